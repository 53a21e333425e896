use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use uuid::Uuid;

/// One field group of a PTP/IP packet: knows how to parse itself from a frame
/// body and how to append itself to one. The 8-byte `{length, packet type}`
/// header is handled by the frame layer, not here.
pub trait PacketComponent: Sized {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error>;

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    StdIo(#[from] io::Error),
    #[error("frame shorter than its fixed packet header")]
    ShortFrame,
    #[error("unknown packet type {0:#010x}")]
    UnknownPacketType(u32),
    #[error("no null terminator found for string field")]
    MalformedString,
    #[error("encountered invalid value for {name}: {value:#x}")]
    InvalidEnumValue { name: &'static str, value: u32 },
}

impl PacketComponent for u16 {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        cursor.read_u16::<LittleEndian>().map_err(Into::into)
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        cursor.write_u16::<LittleEndian>(*self).map_err(Into::into)
    }
}

impl PacketComponent for u32 {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        cursor.read_u32::<LittleEndian>().map_err(Into::into)
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        cursor.write_u32::<LittleEndian>(*self).map_err(Into::into)
    }
}

impl PacketComponent for u64 {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        cursor.read_u64::<LittleEndian>().map_err(Into::into)
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        cursor.write_u64::<LittleEndian>(*self).map_err(Into::into)
    }
}

impl<const N: usize> PacketComponent for [u8; N] {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let mut dest = [0u8; N];
        cursor.read_exact(&mut dest)?;
        Ok(dest)
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        cursor.write_all(self.as_slice()).map_err(Into::into)
    }
}

// GUIDs travel in plain RFC 4122 byte order, not byte-swapped like the
// integer fields around them.
impl PacketComponent for Uuid {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        <[u8; 16]>::read(cursor).map(Uuid::from_bytes)
    }

    fn write(&self, cursor: &mut Cursor<Vec<u8>>) -> Result<(), Error> {
        cursor.write_all(self.as_bytes()).map_err(Into::into)
    }
}

/// Reads a UTF-16LE string terminated by a single 16-bit null. The terminator
/// must occur within the frame.
pub fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let mut units = Vec::new();
    loop {
        let unit = match cursor.read_u16::<LittleEndian>() {
            Ok(unit) => unit,
            Err(_) => return Err(Error::MalformedString),
        };
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|_| Error::MalformedString)
}

pub fn write_string(cursor: &mut Cursor<Vec<u8>>, value: &str) -> Result<(), Error> {
    for unit in value.encode_utf16() {
        cursor.write_u16::<LittleEndian>(unit)?;
    }
    cursor.write_u16::<LittleEndian>(0).map_err(Into::into)
}

/// Consumes the remainder of the frame as an opaque payload. Trailing byte
/// fields carry no length prefix; their extent is whatever is left.
pub fn read_payload(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    cursor.read_to_end(&mut payload)?;
    Ok(payload)
}
