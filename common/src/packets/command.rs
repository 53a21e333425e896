//! Operation, data-phase and event packets of the base standard.

use super::component::{self, Error, PacketComponent};
use super::DataPhase;
use crate::ptp::{EventCode, OperationCode, ResponseCode, TransactionId};
use std::io::Cursor;

/// Marks a `StartData` whose total size is unknown at the start of the phase.
pub const UNKNOWN_DATA_LENGTH: u64 = 0xFFFF_FFFF_FFFF_FFFF;

const MAX_PARAMETERS: usize = 5;

/// Issued by the Initiator on the Command/Data connection. A `DataOut` phase
/// must be followed by `StartData`; a null object is transferred as
/// `StartData{0}` plus one empty `EndData` with no `Data` in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationRequestPacket {
    pub data_phase_info: DataPhase,
    pub operation_code: OperationCode,
    pub transaction_id: TransactionId,
    pub parameters: [u32; 5],
}

impl OperationRequestPacket {
    pub fn new(
        data_phase_info: DataPhase,
        operation_code: OperationCode,
        transaction_id: TransactionId,
        parameters: [u32; 5],
    ) -> Self {
        Self {
            data_phase_info,
            operation_code,
            transaction_id,
            parameters,
        }
    }
}

impl PacketComponent for OperationRequestPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let raw_phase = u32::read(cursor)?;
        let data_phase_info = DataPhase::from_raw(raw_phase).ok_or(Error::InvalidEnumValue {
            name: "DataPhase",
            value: raw_phase,
        })?;
        let operation_code = u16::read(cursor)?;
        let transaction_id = u32::read(cursor)?;
        let mut parameters = [0u32; MAX_PARAMETERS];
        for parameter in &mut parameters {
            *parameter = u32::read(cursor)?;
        }
        Ok(Self {
            data_phase_info,
            operation_code,
            transaction_id,
            parameters,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        (self.data_phase_info as u32).write(cursor)?;
        self.operation_code.write(cursor)?;
        self.transaction_id.write(cursor)?;
        for parameter in &self.parameters {
            parameter.write(cursor)?;
        }
        Ok(())
    }
}

/// The Responder's verdict on a transaction. Devices commonly omit unused
/// trailing parameters, so the inbound side keeps however many arrived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationResponsePacket {
    pub response_code: ResponseCode,
    pub transaction_id: TransactionId,
    pub parameters: Vec<u32>,
}

impl OperationResponsePacket {
    pub const FIXED_FIELDS: usize = 6;

    pub fn new(response_code: ResponseCode, transaction_id: TransactionId) -> Self {
        Self {
            response_code,
            transaction_id,
            parameters: Vec::new(),
        }
    }
}

impl PacketComponent for OperationResponsePacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        if cursor.get_ref().len() < Self::FIXED_FIELDS {
            return Err(Error::ShortFrame);
        }
        let response_code = u16::read(cursor)?;
        let transaction_id = u32::read(cursor)?;
        let parameters = read_parameters(cursor, MAX_PARAMETERS)?;
        Ok(Self {
            response_code,
            transaction_id,
            parameters,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.response_code.write(cursor)?;
        self.transaction_id.write(cursor)?;
        for parameter in &self.parameters {
            parameter.write(cursor)?;
        }
        Ok(())
    }
}

/// Responder state change notification, delivered on the Event connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventPacket {
    pub event_code: EventCode,
    pub transaction_id: TransactionId,
    pub parameters: Vec<u32>,
}

impl EventPacket {
    pub const FIXED_FIELDS: usize = 6;
}

impl PacketComponent for EventPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        if cursor.get_ref().len() < Self::FIXED_FIELDS {
            return Err(Error::ShortFrame);
        }
        let event_code = u16::read(cursor)?;
        let transaction_id = u32::read(cursor)?;
        let parameters = read_parameters(cursor, 3)?;
        Ok(Self {
            event_code,
            transaction_id,
            parameters,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.event_code.write(cursor)?;
        self.transaction_id.write(cursor)?;
        for parameter in &self.parameters {
            parameter.write(cursor)?;
        }
        Ok(())
    }
}

/// Signals the beginning of a data phase in either direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartDataPacket {
    pub transaction_id: TransactionId,
    pub total_data_length: u64,
}

impl StartDataPacket {
    pub const FIXED_FIELDS: usize = 12;
}

impl PacketComponent for StartDataPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        if cursor.get_ref().len() < Self::FIXED_FIELDS {
            return Err(Error::ShortFrame);
        }
        Ok(Self {
            transaction_id: u32::read(cursor)?,
            total_data_length: u64::read(cursor)?,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.transaction_id.write(cursor)?;
        self.total_data_length.write(cursor)
    }
}

/// One fragment of the data phase. Fragmentation is free-form; the payload
/// length is implied by the frame length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPacket {
    pub transaction_id: TransactionId,
    pub payload: Vec<u8>,
}

impl PacketComponent for DataPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(Self {
            transaction_id: u32::read(cursor)?,
            payload: component::read_payload(cursor)?,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.transaction_id.write(cursor)?;
        std::io::Write::write_all(cursor, &self.payload).map_err(Into::into)
    }
}

/// Terminates the data phase; may carry the final payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndDataPacket {
    pub transaction_id: TransactionId,
    pub payload: Vec<u8>,
}

impl PacketComponent for EndDataPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(Self {
            transaction_id: u32::read(cursor)?,
            payload: component::read_payload(cursor)?,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.transaction_id.write(cursor)?;
        std::io::Write::write_all(cursor, &self.payload).map_err(Into::into)
    }
}

/// Aborts a transaction and any open data phase on either side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CancelPacket {
    pub transaction_id: TransactionId,
}

impl PacketComponent for CancelPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(Self {
            transaction_id: u32::read(cursor)?,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.transaction_id.write(cursor)
    }
}

fn read_parameters(cursor: &mut Cursor<&[u8]>, limit: usize) -> Result<Vec<u32>, Error> {
    let mut parameters = Vec::new();
    while parameters.len() < limit {
        let remaining = cursor.get_ref().len() as u64 - cursor.position();
        if remaining < 4 {
            break;
        }
        parameters.push(u32::read(cursor)?);
    }
    Ok(parameters)
}
