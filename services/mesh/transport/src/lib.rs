//! UDP unicast/multicast endpoints, receive loops, and datagram writers for mesh.
//!
//! This crate provides the transport endpoints the discovery protocol runs on.
//! Readers and writers are separate capabilities expressed as traits, with
//! unicast and multicast readers as sibling implementations.
//!
//! ## Features
//!
//! - **Explicit lifecycle**: `start_receiving` spawns one receive task,
//!   `stop_receiving` waits for it and releases the socket
//! - **Self-describing datagrams**: every write is one envelope decodable on its own
//! - **Non-fatal receive errors**: undecodable and empty datagrams are logged,
//!   counted, and skipped
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_transport::{DatagramReader, DatagramWriter, UdpWriter, UnicastReader};
//! use mesh_wire::{Envelope, PacketHeader};
//!
//! # async fn example() -> Result<(), mesh_transport::TransportError> {
//! let mut reader = UnicastReader::new("127.0.0.1:1146")?;
//! let mut messages = reader.start_receiving("data").await?;
//!
//! let writer = UdpWriter::new("127.0.0.1:1146")?;
//! writer.write(&Envelope::Header(PacketHeader::new(1))).await?;
//!
//! if let Some(envelope) = messages.recv().await {
//!     println!("received {:?}", envelope);
//! }
//! reader.stop_receiving().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod memory;
pub mod multicast;
pub mod reader;
pub mod unicast;
pub mod writer;

// Re-export main types
pub use error::TransportError;
pub use memory::MemoryWriter;
pub use multicast::MulticastReader;
pub use reader::{resolve_ipv4, DatagramReader, ReceiveStats, DEFAULT_RECV_CAPACITY};
pub use unicast::UnicastReader;
pub use writer::{outbound_ipv4, DatagramWriter, UdpWriter};
