//! Connection-establishment packets of the base standard.

use super::component::{self, Error, PacketComponent};
use super::FailReason;
use std::io::Cursor;
use uuid::Uuid;

pub const PV_VERSION_ONE_POINT_ZERO: u32 = 0x0001_0000;

/// Sent by the Initiator on a freshly opened Command/Data connection to
/// communicate its identity. The Responder may reject it by identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitCommandRequestPacket {
    pub guid: Uuid,
    pub friendly_name: String,
    /// Major number in the upper 16 bits, minor in the lower.
    pub protocol_version: u32,
}

impl InitCommandRequestPacket {
    pub fn new(guid: Uuid, friendly_name: &str) -> Self {
        Self {
            guid,
            friendly_name: friendly_name.to_owned(),
            protocol_version: PV_VERSION_ONE_POINT_ZERO,
        }
    }
}

impl PacketComponent for InitCommandRequestPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(Self {
            guid: Uuid::read(cursor)?,
            friendly_name: component::read_string(cursor)?,
            protocol_version: u32::read(cursor)?,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.guid.write(cursor)?;
        component::write_string(cursor, &self.friendly_name)?;
        self.protocol_version.write(cursor)
    }
}

/// The Responder's answer to [`InitCommandRequestPacket`], carrying the
/// connection number to reuse when opening the event channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitCommandAckPacket {
    pub connection_number: u32,
    pub responder_guid: Uuid,
    pub responder_friendly_name: String,
    pub responder_protocol_version: u32,
}

impl InitCommandAckPacket {
    pub const FIXED_FIELDS: usize = 24;
}

impl PacketComponent for InitCommandAckPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        if cursor.get_ref().len() < Self::FIXED_FIELDS {
            return Err(Error::ShortFrame);
        }
        Ok(Self {
            connection_number: u32::read(cursor)?,
            responder_guid: Uuid::read(cursor)?,
            responder_friendly_name: component::read_string(cursor)?,
            responder_protocol_version: u32::read(cursor)?,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.connection_number.write(cursor)?;
        self.responder_guid.write(cursor)?;
        component::write_string(cursor, &self.responder_friendly_name)?;
        self.responder_protocol_version.write(cursor)
    }
}

/// Opens the Event connection, echoing the connection number assigned by the
/// InitCommandAck.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitEventRequestPacket {
    pub connection_number: u32,
}

impl PacketComponent for InitEventRequestPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(Self {
            connection_number: u32::read(cursor)?,
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.connection_number.write(cursor)
    }
}

/// Rejection of either init request. The Initiator must close the
/// Command/Data connection upon receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitFailPacket {
    pub reason: FailReason,
}

impl InitFailPacket {
    pub const FIXED_FIELDS: usize = 4;
}

impl PacketComponent for InitFailPacket {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(Self {
            reason: FailReason::from_raw(u32::read(cursor)?),
        })
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        self.reason.as_raw().write(cursor)
    }
}
