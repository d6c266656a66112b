//! In-process writer that hands envelopes to a channel instead of a socket.
//!
//! Used to wire endpoints together inside one process and to observe exactly
//! what a component transmits.

use crate::error::TransportError;
use crate::writer::DatagramWriter;
use async_trait::async_trait;
use mesh_wire::Envelope;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Writer delivering encoded-then-decoded envelopes to an mpsc channel
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl MemoryWriter {
    /// Create a writer and the receiver that observes its output
    pub fn new(addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { addr, tx }, rx)
    }
}

#[async_trait]
impl DatagramWriter for MemoryWriter {
    async fn write(&self, envelope: &Envelope) -> Result<usize, TransportError> {
        // Go through the codec so size limits and encodability match a real socket.
        let datagram = envelope.encode()?;
        let decoded = Envelope::decode(&datagram)?;

        self.tx
            .send(decoded)
            .map_err(|_| TransportError::ChannelClosed(self.addr))?;
        Ok(datagram.len())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }
}
