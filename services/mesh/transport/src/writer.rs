//! Datagram writers.
//!
//! Every write opens a fresh ephemeral socket and sends exactly one
//! self-describing datagram, so no state is shared between sends.

use crate::error::TransportError;
use crate::reader::resolve_ipv4;
use async_trait::async_trait;
use mesh_wire::Envelope;
use socket2::{Domain, SockRef, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

/// Writer side of a transport endpoint
#[async_trait]
pub trait DatagramWriter: Send + Sync {
    /// Encode one envelope and send it as a single datagram.
    ///
    /// Returns the number of bytes sent.
    async fn write(&self, envelope: &Envelope) -> Result<usize, TransportError>;

    /// Address this writer sends to
    fn remote_addr(&self) -> SocketAddr;
}

/// Writer sending to a unicast or multicast UDP address
#[derive(Debug, Clone)]
pub struct UdpWriter {
    addr: SocketAddr,
    multicast_interface: Option<Ipv4Addr>,
}

impl UdpWriter {
    /// Create a writer for a remote address (host:port)
    pub fn new(addr: &str) -> Result<Self, TransportError> {
        Ok(Self {
            addr: resolve_ipv4(addr)?,
            multicast_interface: None,
        })
    }

    /// Send multicast datagrams out of a specific local interface
    pub fn with_multicast_interface(mut self, interface: Ipv4Addr) -> Self {
        self.multicast_interface = Some(interface);
        self
    }
}

/// Local IPv4 address the host would use to reach `remote`.
///
/// Nothing is sent; connecting a datagram socket only selects the route.
pub fn outbound_ipv4(remote: SocketAddr) -> Result<Ipv4Addr, TransportError> {
    let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let bind_err = |e: std::io::Error| TransportError::Bind {
        addr: local,
        source: e,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(bind_err)?;
    socket.connect(&remote.into()).map_err(|e| TransportError::Send {
        addr: remote,
        source: e,
    })?;

    socket
        .local_addr()
        .map_err(bind_err)?
        .as_socket_ipv4()
        .map(|addr| *addr.ip())
        .ok_or_else(|| TransportError::NoIpv4(remote.to_string()))
}

#[async_trait]
impl DatagramWriter for UdpWriter {
    async fn write(&self, envelope: &Envelope) -> Result<usize, TransportError> {
        let datagram = envelope.encode()?;

        let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TransportError::Bind {
                addr: local,
                source: e,
            })?;

        if self.addr.ip().is_multicast() {
            socket
                .set_multicast_loop_v4(true)
                .map_err(|e| TransportError::Send {
                    addr: self.addr,
                    source: e,
                })?;
            if let Some(interface) = self.multicast_interface {
                SockRef::from(&socket)
                    .set_multicast_if_v4(&interface)
                    .map_err(|e| TransportError::Send {
                        addr: self.addr,
                        source: e,
                    })?;
            }
        }

        let len = socket
            .send_to(&datagram, self.addr)
            .await
            .map_err(|e| TransportError::Send {
                addr: self.addr,
                source: e,
            })?;

        debug!(addr = %self.addr, kind = %envelope.kind(), len, "Wrote datagram");
        Ok(len)
    }

    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }
}
