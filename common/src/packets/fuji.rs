//! Fuji deviations from the base standard.
//!
//! On the Command/Data channel Fuji cameras fold the PTP operation code into
//! the packet-type word: the frame header is `{length: u32}` followed by
//! `{data phase: u16, operation code: u16}` read as two little-endian
//! halves. Interpreted as one 32-bit word that is `(code << 16) | phase`.
//! Init packets keep the generic framing but drop the protocol-version field.

use super::component::{self, Error, PacketComponent};
use super::{DataPhase, HEADER_SIZE};
use crate::ptp::{DevicePropCode, OperationCode, ResponseCode, TransactionId};
use std::io::{Cursor, Write};
use uuid::Uuid;

/// Device property holding the camera application version, read during the
/// Fuji session login.
pub const DPC_FUJI_APP_VERSION: DevicePropCode = 0xDF24;

/// Total size of the end-of-data marker frame: length word plus the fixed
/// fields of a parameterless response.
pub const END_OF_DATA_SIZE: usize = 12;

pub fn fold_packet_type(operation_code: OperationCode, data_phase: DataPhase) -> u32 {
    (u32::from(operation_code) << 16) | (data_phase as u32 & 0xFFFF)
}

/// Inverse of [`fold_packet_type`]: `(operation code, raw data phase)`.
pub fn unfold_packet_type(word: u32) -> (OperationCode, u16) {
    ((word >> 16) as u16, word as u16)
}

/// Fuji's init command request deviates from the standard: it has no
/// protocol-version field. Sending one earns an InitFail with the
/// "invalid parameter" reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FujiInitCommandRequestPacket {
    pub guid: Uuid,
    pub friendly_name: String,
}

impl FujiInitCommandRequestPacket {
    pub fn new(guid: Uuid, friendly_name: &str) -> Self {
        Self {
            guid,
            friendly_name: friendly_name.to_owned(),
        }
    }

    /// Generic framing with the standard InitCommandRequest type word; only
    /// the payload differs.
    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![0u8; HEADER_SIZE]);
        cursor.set_position(HEADER_SIZE as u64);
        self.guid.write(&mut cursor)?;
        component::write_string(&mut cursor, &self.friendly_name)?;

        let mut frame = cursor.into_inner();
        let length = frame.len() as u32;
        frame[0 .. 4].copy_from_slice(&length.to_le_bytes());
        frame[4 .. 8].copy_from_slice(&(super::PacketType::InitCommandRequest as u32).to_le_bytes());
        Ok(frame)
    }
}

/// Operation request on the folded Fuji command channel. Always carries all
/// five parameter slots, zero padded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FujiOperationRequestPacket {
    pub data_phase: u16,
    pub operation_code: OperationCode,
    pub transaction_id: TransactionId,
    pub parameters: [u32; 5],
}

impl FujiOperationRequestPacket {
    pub fn new(
        data_phase: DataPhase,
        operation_code: OperationCode,
        transaction_id: TransactionId,
        parameters: [u32; 5],
    ) -> Self {
        Self {
            data_phase: data_phase as u32 as u16,
            operation_code,
            transaction_id,
            parameters,
        }
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![0u8; 4]);
        cursor.set_position(4);
        self.data_phase.write(&mut cursor)?;
        self.operation_code.write(&mut cursor)?;
        self.transaction_id.write(&mut cursor)?;
        for parameter in &self.parameters {
            parameter.write(&mut cursor)?;
        }

        let mut frame = cursor.into_inner();
        let length = frame.len() as u32;
        frame[0 .. 4].copy_from_slice(&length.to_le_bytes());
        Ok(frame)
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self, Error> {
        if frame.len() < 12 {
            return Err(Error::ShortFrame);
        }
        let mut cursor = Cursor::new(&frame[4 ..]);
        let data_phase = u16::read(&mut cursor)?;
        let operation_code = u16::read(&mut cursor)?;
        let transaction_id = u32::read(&mut cursor)?;
        let mut parameters = [0u32; 5];
        for parameter in &mut parameters {
            let remaining = cursor.get_ref().len() as u64 - cursor.position();
            if remaining < 4 {
                break;
            }
            *parameter = u32::read(&mut cursor)?;
        }
        Ok(Self {
            data_phase,
            operation_code,
            transaction_id,
            parameters,
        })
    }
}

/// Second message of a Fuji data-out transaction: the folded header with the
/// DataOut phase, followed by the raw object bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FujiOperationDataPacket {
    pub operation_code: OperationCode,
    pub transaction_id: TransactionId,
    pub payload: Vec<u8>,
}

impl FujiOperationDataPacket {
    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![0u8; 4]);
        cursor.set_position(4);
        (DataPhase::DataOut as u32 as u16).write(&mut cursor)?;
        self.operation_code.write(&mut cursor)?;
        self.transaction_id.write(&mut cursor)?;
        cursor.write_all(&self.payload)?;

        let mut frame = cursor.into_inner();
        let length = frame.len() as u32;
        frame[0 .. 4].copy_from_slice(&length.to_le_bytes());
        Ok(frame)
    }
}

/// Response frame on the folded channel. A `data_phase` of `DataOut`
/// announces raw payload bytes to follow; the phase value `Unknown` with a
/// success code marks the end of the data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FujiOperationResponsePacket {
    pub data_phase: u16,
    pub response_code: ResponseCode,
    pub transaction_id: TransactionId,
    pub parameters: Vec<u32>,
}

impl FujiOperationResponsePacket {
    pub const FIXED_FIELDS: usize = 8;

    pub fn new(
        data_phase: DataPhase,
        response_code: ResponseCode,
        transaction_id: TransactionId,
    ) -> Self {
        Self {
            data_phase: data_phase as u32 as u16,
            response_code,
            transaction_id,
            parameters: Vec::new(),
        }
    }

    pub fn end_of_data(transaction_id: TransactionId) -> Self {
        Self::new(DataPhase::Unknown, crate::ptp::RC_OK, transaction_id)
    }

    pub fn announces_data(&self) -> bool {
        self.data_phase == DataPhase::DataOut as u32 as u16
    }

    pub fn is_end_of_data(&self) -> bool {
        self.data_phase == DataPhase::Unknown as u32 as u16
    }

    pub fn was_successful(&self) -> bool {
        self.response_code == crate::ptp::RC_OK
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let mut cursor = Cursor::new(vec![0u8; 4]);
        cursor.set_position(4);
        self.data_phase.write(&mut cursor)?;
        self.response_code.write(&mut cursor)?;
        self.transaction_id.write(&mut cursor)?;
        for parameter in &self.parameters {
            parameter.write(&mut cursor)?;
        }

        let mut frame = cursor.into_inner();
        let length = frame.len() as u32;
        frame[0 .. 4].copy_from_slice(&length.to_le_bytes());
        Ok(frame)
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self, Error> {
        if frame.len() < Self::FIXED_FIELDS + 4 {
            return Err(Error::ShortFrame);
        }
        let mut cursor = Cursor::new(&frame[4 ..]);
        let data_phase = u16::read(&mut cursor)?;
        let response_code = u16::read(&mut cursor)?;
        let transaction_id = u32::read(&mut cursor)?;
        let mut parameters = Vec::new();
        while parameters.len() < 5 {
            let remaining = cursor.get_ref().len() as u64 - cursor.position();
            if remaining < 4 {
                break;
            }
            parameters.push(u32::read(&mut cursor)?);
        }
        Ok(Self {
            data_phase,
            response_code,
            transaction_id,
            parameters,
        })
    }
}

/// Scans a raw data-phase buffer for the end-of-data marker of the given
/// transaction, returning the payload length in front of it and the decoded
/// marker. A payload that happened to embed a byte-exact marker for the same
/// transaction would be cut short here; camera datasets do not contain one.
pub fn find_end_of_data(
    buffer: &[u8],
    transaction_id: TransactionId,
) -> Option<(usize, FujiOperationResponsePacket)> {
    if buffer.len() < END_OF_DATA_SIZE {
        return None;
    }

    for offset in 0 ..= buffer.len() - END_OF_DATA_SIZE {
        let window = &buffer[offset .. offset + END_OF_DATA_SIZE];
        let length = u32::from_le_bytes(window[0 .. 4].try_into().unwrap());
        if length as usize != END_OF_DATA_SIZE {
            continue;
        }
        let response = match FujiOperationResponsePacket::from_frame(window) {
            Ok(response) => response,
            Err(_) => continue,
        };
        if response.is_end_of_data() && response.transaction_id == transaction_id {
            return Some((offset, response));
        }
    }

    None
}
