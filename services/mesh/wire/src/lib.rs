//! Datagram envelope, fixed header, and CBOR body codec for mesh discovery.
//!
//! This crate provides the wire format shared by every mesh endpoint. Each
//! datagram is self-describing: it can be decoded on its own, without any
//! type negotiation carried over from earlier datagrams.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8 version           | WIRE_VERSION (1)           |
//! +----------------------+----------------------------+
//! | u8 kind              | Header / Announce / Data   |
//! +----------------------+----------------------------+
//! | u16 flags            | CHECKSUM                   |
//! +----------------------+----------------------------+
//! | u32 body_len         | length of CBOR body        |
//! +----------------------+----------------------------+
//! | u32 body_crc         | crc32 of body              |
//! +----------------------+----------------------------+
//! | body                 | canonical CBOR             |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod announce;
pub mod envelope;
pub mod error;
pub mod header;

// Re-export main types
pub use announce::{
    AnnouncePacket, AnnounceRecord, DataMessage, NodeIdentity, PacketHeader, ReportedNeighbor,
    DEFAULT_LINK_COST,
};
pub use envelope::Envelope;
pub use error::WireError;
pub use header::{
    DatagramHeader, Flags, MessageKind, DATAGRAM_HEADER_SIZE, MAX_DATAGRAM_SIZE, WIRE_VERSION,
};
