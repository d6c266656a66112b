//! Multicast UDP reader.

use crate::error::TransportError;
use crate::reader::{resolve_ipv4, DatagramReader, ReceiveLoop, ReceiveStats};
use async_trait::async_trait;
use mesh_wire::Envelope;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Reader that joins an IPv4 multicast group
pub struct MulticastReader {
    group: SocketAddr,
    interface: Ipv4Addr,
    receiver: ReceiveLoop,
}

impl MulticastReader {
    /// Create a reader for a multicast group address (group:port)
    pub fn new(group: &str) -> Result<Self, TransportError> {
        let group = resolve_ipv4(group)?;
        if !group.ip().is_multicast() {
            return Err(TransportError::NotMulticast(group));
        }

        Ok(Self {
            group,
            interface: Ipv4Addr::UNSPECIFIED,
            receiver: ReceiveLoop::new(group),
        })
    }

    /// Join the group on a specific local interface instead of the default one
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    /// Set the capacity of the channel returned by `start_receiving`
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.receiver.set_capacity(capacity);
        self
    }

    /// Bind the group port on all interfaces and join the group
    fn bind_group(&self) -> std::io::Result<UdpSocket> {
        let group_ip = match self.group.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "only IPv4 multicast is supported",
                ))
            }
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        // Several nodes on one host may listen on the same group port.
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        if let Err(e) = socket.set_reuse_port(true) {
            debug!(group = %self.group, "SO_REUSEPORT unavailable: {}", e);
        }

        socket.set_multicast_loop_v4(true)?;

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.group.port());
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(&group_ip, &self.interface)?;

        let std_socket: std::net::UdpSocket = socket.into();
        std_socket.set_nonblocking(true)?;

        info!(group = %self.group, interface = %self.interface, "Joined multicast group");
        UdpSocket::from_std(std_socket)
    }
}

#[async_trait]
impl DatagramReader for MulticastReader {
    async fn start_receiving(&mut self, tag: &str) -> Result<mpsc::Receiver<Envelope>, TransportError> {
        self.receiver.ensure_stopped()?;

        let socket = self.bind_group().map_err(|e| TransportError::Bind {
            addr: self.group,
            source: e,
        })?;

        self.receiver.start(socket, tag)
    }

    async fn stop_receiving(&mut self) -> Result<(), TransportError> {
        self.receiver.stop().await
    }

    fn local_addr(&self) -> SocketAddr {
        self.group
    }

    fn stats(&self) -> ReceiveStats {
        self.receiver.stats()
    }

    fn set_error_sink(&mut self, sink: mpsc::UnboundedSender<TransportError>) {
        self.receiver.set_error_sink(sink);
    }
}
