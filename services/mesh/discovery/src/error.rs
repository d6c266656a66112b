//! Discovery error types.

use mesh_transport::TransportError;
use mesh_wire::MessageKind;
use thiserror::Error;

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// start called on a running daemon
    #[error("announce daemon is already running")]
    AlreadyRunning,

    /// stop called on a daemon that is not running
    #[error("announce daemon is not running")]
    NotRunning,

    /// Announce settings that cannot run
    #[error("invalid announce configuration: {0}")]
    InvalidConfig(String),

    /// A message other than an announce reached the protocol stream
    #[error("protocol mismatch: expected announce, got {0}")]
    ProtocolMismatch(MessageKind),

    /// An announce could not be transmitted
    #[error("announce transmit failed: {0}")]
    Transmit(#[source] TransportError),

    /// Transport endpoint failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A background task ended abnormally
    #[error("{0} task failed")]
    TaskFailed(&'static str),
}
