//! Unicast UDP reader.

use crate::error::TransportError;
use crate::reader::{resolve_ipv4, DatagramReader, ReceiveLoop, ReceiveStats};
use async_trait::async_trait;
use mesh_wire::Envelope;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Reader bound to a local unicast port
pub struct UnicastReader {
    addr: SocketAddr,
    receiver: ReceiveLoop,
}

impl UnicastReader {
    /// Create a reader for a local address (host:port).
    ///
    /// The address is resolved here; the socket is bound by `start_receiving`.
    pub fn new(addr: &str) -> Result<Self, TransportError> {
        let addr = resolve_ipv4(addr)?;
        Ok(Self {
            addr,
            receiver: ReceiveLoop::new(addr),
        })
    }

    /// Set the capacity of the channel returned by `start_receiving`
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.receiver.set_capacity(capacity);
        self
    }
}

#[async_trait]
impl DatagramReader for UnicastReader {
    async fn start_receiving(&mut self, tag: &str) -> Result<mpsc::Receiver<Envelope>, TransportError> {
        self.receiver.ensure_stopped()?;

        let socket = UdpSocket::bind(self.addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: self.addr,
                source: e,
            })?;

        self.receiver.start(socket, tag)
    }

    async fn stop_receiving(&mut self) -> Result<(), TransportError> {
        self.receiver.stop().await
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn stats(&self) -> ReceiveStats {
        self.receiver.stats()
    }

    fn set_error_sink(&mut self, sink: mpsc::UnboundedSender<TransportError>) {
        self.receiver.set_error_sink(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{DatagramWriter, UdpWriter};
    use bytes::Bytes;
    use mesh_wire::{DataMessage, PacketHeader};
    use std::time::Duration;

    fn free_local_addr() -> String {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().to_string()
    }

    async fn next(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("stream closed")
    }

    #[tokio::test]
    async fn test_send_receive() {
        let addr = free_local_addr();
        let mut reader = UnicastReader::new(&addr).unwrap();
        let mut rx = reader.start_receiving("test").await.unwrap();

        let writer = UdpWriter::new(&addr).unwrap();
        writer
            .write(&Envelope::Data(DataMessage::new("n1", 1, Bytes::from_static(b"hello"))))
            .await
            .unwrap();

        match next(&mut rx).await {
            Envelope::Data(message) => {
                assert_eq!(message.source, "n1");
                assert_eq!(message.payload, Bytes::from_static(b"hello"));
            }
            other => panic!("unexpected envelope {:?}", other),
        }

        reader.stop_receiving().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_receive_multiple_in_order() {
        let addr = free_local_addr();
        let mut reader = UnicastReader::new(&addr).unwrap();
        let mut rx = reader.start_receiving("test").await.unwrap();

        let writer = UdpWriter::new(&addr).unwrap();
        writer.write(&Envelope::Header(PacketHeader::new(1))).await.unwrap();
        writer.write(&Envelope::Header(PacketHeader::new(2))).await.unwrap();

        assert_eq!(next(&mut rx).await, Envelope::Header(PacketHeader::new(1)));
        assert_eq!(next(&mut rx).await, Envelope::Header(PacketHeader::new(2)));
        assert_eq!(reader.stats().delivered, 2);

        reader.stop_receiving().await.unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_datagram_is_skipped() {
        let addr = free_local_addr();
        let mut reader = UnicastReader::new(&addr).unwrap();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        reader.set_error_sink(err_tx);
        let mut rx = reader.start_receiving("test").await.unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"definitely not an envelope", &addr).await.unwrap();

        let writer = UdpWriter::new(&addr).unwrap();
        writer.write(&Envelope::Header(PacketHeader::new(7))).await.unwrap();

        assert_eq!(next(&mut rx).await, Envelope::Header(PacketHeader::new(7)));
        let reported = tokio::time::timeout(Duration::from_secs(5), err_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reported, TransportError::Decode { .. }));
        assert_eq!(reader.stats().decode_failures, 1);

        reader.stop_receiving().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_allows_immediate_rebind() {
        let addr = free_local_addr();
        let mut reader = UnicastReader::new(&addr).unwrap();
        let mut rx = reader.start_receiving("first").await.unwrap();

        reader.stop_receiving().await.unwrap();
        // Nothing is produced after stop returns.
        assert!(rx.recv().await.is_none());

        let mut second = UnicastReader::new(&addr).unwrap();
        second.start_receiving("second").await.unwrap();
        second.stop_receiving().await.unwrap();

        // The original reader can be restarted as well.
        reader.start_receiving("again").await.unwrap();
        reader.stop_receiving().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_and_stop_are_errors() {
        let addr = free_local_addr();
        let mut reader = UnicastReader::new(&addr).unwrap();

        assert!(matches!(
            reader.stop_receiving().await,
            Err(TransportError::NotReceiving(_))
        ));

        let _rx = reader.start_receiving("test").await.unwrap();
        assert!(matches!(
            reader.start_receiving("test").await,
            Err(TransportError::AlreadyReceiving(_))
        ));

        reader.stop_receiving().await.unwrap();
        assert!(matches!(
            reader.stop_receiving().await,
            Err(TransportError::NotReceiving(_))
        ));
    }

    #[test]
    fn test_bad_address_fails_construction() {
        assert!(UnicastReader::new("nowhere").is_err());
    }
}
