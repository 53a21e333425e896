mod component;

pub mod command;
pub mod fuji;
pub mod init;

pub use command::*;
pub use component::*;
pub use init::*;

use std::fmt::{self, Display, Formatter};
use std::io::Cursor;

/// Every wire frame starts with `{length: u32, packet type: u32}`, where the
/// length covers the whole frame including this header.
pub const HEADER_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    InitCommandRequest = 0x0000_0001,
    InitCommandAck = 0x0000_0002,
    InitEventRequest = 0x0000_0003,
    InitEventAck = 0x0000_0004,
    InitFail = 0x0000_0005,
    OperationRequest = 0x0000_0006,
    OperationResponse = 0x0000_0007,
    Event = 0x0000_0008,
    StartData = 0x0000_0009,
    Data = 0x0000_000A,
    Cancel = 0x0000_000B,
    EndData = 0x0000_000C,
    ProbeRequest = 0x0000_000D,
    ProbeResponse = 0x0000_000E,
}

impl PacketType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x0000_0001 => Self::InitCommandRequest,
            0x0000_0002 => Self::InitCommandAck,
            0x0000_0003 => Self::InitEventRequest,
            0x0000_0004 => Self::InitEventAck,
            0x0000_0005 => Self::InitFail,
            0x0000_0006 => Self::OperationRequest,
            0x0000_0007 => Self::OperationResponse,
            0x0000_0008 => Self::Event,
            0x0000_0009 => Self::StartData,
            0x0000_000A => Self::Data,
            0x0000_000B => Self::Cancel,
            0x0000_000C => Self::EndData,
            0x0000_000D => Self::ProbeRequest,
            0x0000_000E => Self::ProbeResponse,
            _ => return None,
        })
    }
}

/// Direction of the bulk transfer announced by an operation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum DataPhase {
    /// No data phase, or data flowing Responder to Initiator.
    NoDataOrDataIn = 0x0000_0001,
    /// Data flowing Initiator to Responder.
    DataOut = 0x0000_0002,
    /// The Initiator does not know the direction yet. Responders of limited
    /// capability are allowed to close the connection upon receipt.
    Unknown = 0x0000_0003,
}

impl DataPhase {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x0000_0001 => Some(Self::NoDataOrDataIn),
            0x0000_0002 => Some(Self::DataOut),
            0x0000_0003 => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Reason field of an `InitFail` packet, including the Fuji-specific wire
/// values layered on top of the base standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailReason {
    RejectedInitiator,
    Busy,
    Unspecified,
    FujiDeviceBusy,
    FujiInvalidParameter,
    Other(u32),
}

impl FailReason {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x0000_0001 => Self::RejectedInitiator,
            0x0000_0002 => Self::Busy,
            0x0000_0003 => Self::Unspecified,
            0x0000_2019 => Self::FujiDeviceBusy,
            0x0000_201D => Self::FujiInvalidParameter,
            other => Self::Other(other),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::RejectedInitiator => 0x0000_0001,
            Self::Busy => 0x0000_0002,
            Self::Unspecified => 0x0000_0003,
            Self::FujiDeviceBusy => 0x0000_2019,
            Self::FujiInvalidParameter => 0x0000_201D,
            Self::Other(raw) => raw,
        }
    }
}

impl Display for FailReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RejectedInitiator => write!(f, "rejected: device not allowed"),
            Self::Busy => write!(f, "busy: too many active connections"),
            Self::Unspecified => write!(f, "reason unspecified"),
            Self::FujiDeviceBusy => write!(
                f,
                "fuji: invalid friendly name or camera state: allow to 'change' client or 'reset' connection"
            ),
            Self::FujiInvalidParameter => write!(f, "fuji: unknown protocol version"),
            Self::Other(raw) => write!(f, "unknown failure reason returned {raw:#010x}"),
        }
    }
}

/// The tagged sum over every packet kind of the base standard. Fuji's folded
/// command frames never carry a generic packet-type word and live in
/// [`fuji`] instead.
#[derive(Clone, Debug, PartialEq)]
pub enum PtpIpPacket {
    InitCommandRequest(InitCommandRequestPacket),
    InitCommandAck(InitCommandAckPacket),
    InitEventRequest(InitEventRequestPacket),
    InitEventAck,
    InitFail(InitFailPacket),
    OperationRequest(OperationRequestPacket),
    OperationResponse(OperationResponsePacket),
    Event(EventPacket),
    StartData(StartDataPacket),
    Data(DataPacket),
    EndData(EndDataPacket),
    Cancel(CancelPacket),
    ProbeRequest,
    ProbeResponse,
}

impl PtpIpPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::InitCommandRequest(_) => PacketType::InitCommandRequest,
            Self::InitCommandAck(_) => PacketType::InitCommandAck,
            Self::InitEventRequest(_) => PacketType::InitEventRequest,
            Self::InitEventAck => PacketType::InitEventAck,
            Self::InitFail(_) => PacketType::InitFail,
            Self::OperationRequest(_) => PacketType::OperationRequest,
            Self::OperationResponse(_) => PacketType::OperationResponse,
            Self::Event(_) => PacketType::Event,
            Self::StartData(_) => PacketType::StartData,
            Self::Data(_) => PacketType::Data,
            Self::EndData(_) => PacketType::EndData,
            Self::Cancel(_) => PacketType::Cancel,
            Self::ProbeRequest => PacketType::ProbeRequest,
            Self::ProbeResponse => PacketType::ProbeResponse,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InitCommandRequest(_) => "InitCommandRequest",
            Self::InitCommandAck(_) => "InitCommandAck",
            Self::InitEventRequest(_) => "InitEventRequest",
            Self::InitEventAck => "InitEventAck",
            Self::InitFail(_) => "InitFail",
            Self::OperationRequest(_) => "OperationRequest",
            Self::OperationResponse(_) => "OperationResponse",
            Self::Event(_) => "Event",
            Self::StartData(_) => "StartData",
            Self::Data(_) => "Data",
            Self::EndData(_) => "EndData",
            Self::Cancel(_) => "Cancel",
            Self::ProbeRequest => "ProbeRequest",
            Self::ProbeResponse => "ProbeResponse",
        }
    }

    /// Serializes the packet into a complete wire frame, header included.
    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![0u8; HEADER_SIZE]);
        cursor.set_position(HEADER_SIZE as u64);

        match self {
            Self::InitCommandRequest(packet) => packet.write(&mut cursor)?,
            Self::InitCommandAck(packet) => packet.write(&mut cursor)?,
            Self::InitEventRequest(packet) => packet.write(&mut cursor)?,
            Self::InitEventAck => {}
            Self::InitFail(packet) => packet.write(&mut cursor)?,
            Self::OperationRequest(packet) => packet.write(&mut cursor)?,
            Self::OperationResponse(packet) => packet.write(&mut cursor)?,
            Self::Event(packet) => packet.write(&mut cursor)?,
            Self::StartData(packet) => packet.write(&mut cursor)?,
            Self::Data(packet) => packet.write(&mut cursor)?,
            Self::EndData(packet) => packet.write(&mut cursor)?,
            Self::Cancel(packet) => packet.write(&mut cursor)?,
            Self::ProbeRequest | Self::ProbeResponse => {}
        }

        let mut frame = cursor.into_inner();
        let length = frame.len() as u32;
        frame[0 .. 4].copy_from_slice(&length.to_le_bytes());
        frame[4 .. 8].copy_from_slice(&(self.packet_type() as u32).to_le_bytes());
        Ok(frame)
    }

    /// Decodes one complete frame produced by [`split_frame`] or a
    /// [`FrameAssembler`].
    pub fn decode(frame: &[u8]) -> Result<Self, Error> {
        if frame.len() < HEADER_SIZE {
            return Err(Error::ShortFrame);
        }

        let raw_type = u32::from_le_bytes(frame[4 .. 8].try_into().unwrap());
        let packet_type =
            PacketType::from_raw(raw_type).ok_or(Error::UnknownPacketType(raw_type))?;
        let body = &frame[HEADER_SIZE ..];
        let mut cursor = Cursor::new(body);

        Ok(match packet_type {
            PacketType::InitCommandRequest => {
                Self::InitCommandRequest(InitCommandRequestPacket::read(&mut cursor)?)
            }
            PacketType::InitCommandAck => {
                Self::InitCommandAck(InitCommandAckPacket::read(&mut cursor)?)
            }
            PacketType::InitEventRequest => {
                Self::InitEventRequest(InitEventRequestPacket::read(&mut cursor)?)
            }
            PacketType::InitEventAck => Self::InitEventAck,
            PacketType::InitFail => Self::InitFail(InitFailPacket::read(&mut cursor)?),
            PacketType::OperationRequest => {
                Self::OperationRequest(OperationRequestPacket::read(&mut cursor)?)
            }
            PacketType::OperationResponse => {
                Self::OperationResponse(OperationResponsePacket::read(&mut cursor)?)
            }
            PacketType::Event => Self::Event(EventPacket::read(&mut cursor)?),
            PacketType::StartData => Self::StartData(StartDataPacket::read(&mut cursor)?),
            PacketType::Data => Self::Data(DataPacket::read(&mut cursor)?),
            PacketType::EndData => Self::EndData(EndDataPacket::read(&mut cursor)?),
            PacketType::Cancel => Self::Cancel(CancelPacket::read(&mut cursor)?),
            PacketType::ProbeRequest => Self::ProbeRequest,
            PacketType::ProbeResponse => Self::ProbeResponse,
        })
    }
}

/// Splits one length-prefixed frame off the front of `bytes`.
///
/// Returns `None` while the buffer does not yet hold a complete frame, and
/// the frame plus the excess bytes beyond its declared length otherwise. The
/// excess matters on Fuji command channels, where several logical packets can
/// arrive back to back in one read.
pub fn split_frame(bytes: &[u8]) -> Result<Option<(&[u8], &[u8])>, Error> {
    if bytes.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_le_bytes(bytes[0 .. 4].try_into().unwrap()) as usize;
    if length < HEADER_SIZE {
        return Err(Error::ShortFrame);
    }
    if bytes.len() < length {
        return Ok(None);
    }

    Ok(Some(bytes.split_at(length)))
}

/// Reassembles length-prefixed frames from arbitrary stream segments.
///
/// The raw buffer stays reachable so vendor code can consume unframed bytes
/// (the Fuji data phase) without tearing the assembler down.
#[derive(Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: &[u8]) {
        self.buffer.extend_from_slice(segment);
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let length = match split_frame(&self.buffer)? {
            Some((frame, _)) => frame.len(),
            None => return Ok(None),
        };
        Ok(Some(self.buffer.drain(.. length).collect()))
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn drain(&mut self, count: usize) -> Vec<u8> {
        let count = count.min(self.buffer.len());
        self.buffer.drain(.. count).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
