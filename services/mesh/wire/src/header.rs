//! Fixed datagram header.
//!
//! Every datagram starts with a 12-byte header that names the message kind and
//! carries the body length and checksum, so a receiver can decode any datagram
//! without state from earlier ones.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Fixed header size in bytes
pub const DATAGRAM_HEADER_SIZE: usize = 12;

/// Largest datagram the codec will produce or accept
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Message kinds carried in the header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Bare packet header
    Header = 0x01,
    /// Periodic announce with neighbor snapshot
    Announce = 0x02,
    /// Application payload
    Data = 0x03,
}

impl TryFrom<u8> for MessageKind {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageKind::Header),
            0x02 => Ok(MessageKind::Announce),
            0x03 => Ok(MessageKind::Data),
            _ => Err(crate::WireError::Kind(value)),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Header => write!(f, "header"),
            MessageKind::Announce => write!(f, "announce"),
            MessageKind::Data => write!(f, "data"),
        }
    }
}

bitflags! {
    /// Datagram flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u16 {
        /// body_crc holds a CRC32 of the body; readers must verify it
        const CHECKSUM = 1 << 0;
    }
}

/// Fixed datagram header (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Protocol version (must be 1)
    pub ver: u8,
    /// Message kind of the body
    pub kind: MessageKind,
    /// Datagram flags
    pub flags: Flags,
    /// Length of the CBOR body that follows
    pub body_len: u32,
    /// CRC32 of the body, 0 unless CHECKSUM is set
    pub body_crc: u32,
}

impl DatagramHeader {
    /// Create a checksummed header for a body
    pub fn for_body(kind: MessageKind, body: &[u8]) -> Self {
        Self {
            ver: WIRE_VERSION,
            kind,
            flags: Flags::CHECKSUM,
            body_len: body.len() as u32,
            body_crc: crc32fast::hash(body),
        }
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ver);
        buf.put_u8(self.kind as u8);
        buf.put_u16(self.flags.bits());
        buf.put_u32(self.body_len);
        buf.put_u32(self.body_crc);
    }

    /// Decode the header from the front of a buffer (big-endian)
    pub fn decode(buf: &mut &[u8]) -> Result<Self, crate::WireError> {
        if buf.len() < DATAGRAM_HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let ver = buf.get_u8();
        if ver != WIRE_VERSION {
            return Err(crate::WireError::Version(ver));
        }

        let kind = MessageKind::try_from(buf.get_u8())?;
        let flags = Flags::from_bits(buf.get_u16()).ok_or(crate::WireError::Reserved)?;
        let body_len = buf.get_u32();
        let body_crc = buf.get_u32();

        Ok(Self {
            ver,
            kind,
            flags,
            body_len,
            body_crc,
        })
    }

    /// Check a received body against the header's length and checksum
    pub fn verify_body(&self, body: &[u8]) -> Result<(), crate::WireError> {
        if body.len() < self.body_len as usize {
            return Err(crate::WireError::Incomplete);
        }
        if body.len() > self.body_len as usize {
            return Err(crate::WireError::Malformed);
        }

        if self.flags.contains(Flags::CHECKSUM) {
            let actual = crc32fast::hash(body);
            if actual != self.body_crc {
                return Err(crate::WireError::Checksum {
                    expected: self.body_crc,
                    actual,
                });
            }
        }

        Ok(())
    }
}
