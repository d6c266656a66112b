//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Datagram shorter than the fixed header or the declared body
    #[error("incomplete datagram")]
    Incomplete,

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Reserved flag bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Unknown message kind
    #[error("unknown kind {0}")]
    Kind(u8),

    /// Body checksum mismatch
    #[error("body checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    Checksum {
        /// Checksum carried in the header
        expected: u32,
        /// Checksum computed over the received body
        actual: u32,
    },

    /// Body could not be encoded as CBOR
    #[error("cbor body encoding failed: {0}")]
    Encode(String),

    /// Body could not be decoded from CBOR
    #[error("cbor body invalid: {0}")]
    Decode(String),

    /// Trailing bytes after the declared body
    #[error("malformed datagram")]
    Malformed,
}
