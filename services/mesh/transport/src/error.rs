//! Transport error types.

use mesh_wire::WireError;
use std::net::SocketAddr;
use thiserror::Error;

/// Transport endpoint errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Address could not be parsed or resolved
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        /// Address as given
        addr: String,
        /// Underlying resolver error
        #[source]
        source: std::io::Error,
    },

    /// Address resolved, but not to an IPv4 socket address
    #[error("no IPv4 address for {0}")]
    NoIpv4(String),

    /// Address given to a multicast reader is not a multicast group
    #[error("{0} is not an IPv4 multicast group")]
    NotMulticast(SocketAddr),

    /// Socket could not be created, configured, or bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Local address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Datagram could not be sent
    #[error("send to {addr} failed: {source}")]
    Send {
        /// Destination address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Socket read failed
    #[error("receive on {addr} failed: {source}")]
    Receive {
        /// Local address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Envelope could not be encoded
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A received datagram could not be decoded
    #[error("datagram from {src} could not be decoded: {source}")]
    Decode {
        /// Sender of the datagram
        src: SocketAddr,
        /// Decode failure
        #[source]
        source: WireError,
    },

    /// Destination of an in-memory writer is gone
    #[error("channel to {0} closed")]
    ChannelClosed(SocketAddr),

    /// start_receiving called on a running reader
    #[error("reader on {0} is already receiving")]
    AlreadyReceiving(SocketAddr),

    /// stop_receiving called on a stopped reader
    #[error("reader on {0} is not receiving")]
    NotReceiving(SocketAddr),

    /// Receive task ended abnormally
    #[error("receive task on {0} failed")]
    TaskFailed(SocketAddr),
}
