//! Neighbor discovery for mesh.
//!
//! Every node periodically announces its identity and a snapshot of its
//! neighbor table. Receivers keep the newest announce per node name and
//! re-announce immediately when their own view changes, so the whole network
//! converges on a shared picture of who is reachable.
//!
//! ## Components
//!
//! - [`NeighborTable`]: concurrent name -> record map with sequence-number
//!   ordering
//! - [`ConvergenceHash`]: digest deciding when the local sequence number advances
//! - [`AnnounceDaemon`]: the send and receive tasks of the protocol
//! - [`NetworkInterface`]: joins transport endpoints to a daemon and splits
//!   inbound traffic into protocol and application streams

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod convergence;
pub mod daemon;
pub mod error;
pub mod interface;
pub mod table;

// Re-export main types
pub use convergence::ConvergenceHash;
pub use daemon::{AnnounceConfig, AnnounceDaemon, DaemonState, DEFAULT_ANNOUNCE_INTERVAL};
pub use error::DiscoveryError;
pub use interface::{InterfaceSettings, NetworkInterface, ANNOUNCE_TAG, DATA_TAG};
pub use table::{NeighborTable, Observation};
