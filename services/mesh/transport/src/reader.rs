//! Datagram reader trait and the receive loop shared by every reader.
//!
//! A reader binds its socket on `start_receiving`, spawns exactly one receive
//! task, and hands back the channel that task feeds. `stop_receiving` signals the
//! task and waits for it to finish, so the socket is closed and the address can
//! be bound again as soon as it returns.

use crate::error::TransportError;
use async_trait::async_trait;
use mesh_wire::{Envelope, MAX_DATAGRAM_SIZE};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the channel between a receive task and its consumer
pub const DEFAULT_RECV_CAPACITY: usize = 64;

/// Pause after a failed socket read before reading again
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Reader side of a transport endpoint
#[async_trait]
pub trait DatagramReader: Send + Sync {
    /// Bind the endpoint and start the receive task.
    ///
    /// The returned channel yields every decoded envelope until the reader is
    /// stopped. It cannot be restarted; call `start_receiving` again for a new one.
    async fn start_receiving(&mut self, tag: &str) -> Result<mpsc::Receiver<Envelope>, TransportError>;

    /// Stop the receive task and release the socket.
    ///
    /// Returns once the task has exited; nothing is produced after that.
    async fn stop_receiving(&mut self) -> Result<(), TransportError>;

    /// Address this reader listens on
    fn local_addr(&self) -> SocketAddr;

    /// Counters for the current and previous receive tasks
    fn stats(&self) -> ReceiveStats;

    /// Report decode and socket failures on this channel in addition to logging them
    fn set_error_sink(&mut self, sink: mpsc::UnboundedSender<TransportError>);
}

/// Receive counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Datagrams read from the socket
    pub datagrams: u64,
    /// Zero-length datagrams skipped
    pub empty: u64,
    /// Datagrams that failed to decode
    pub decode_failures: u64,
    /// Envelopes handed to the consumer
    pub delivered: u64,
}

#[derive(Debug, Default)]
struct ReceiveCounters {
    datagrams: AtomicU64,
    empty: AtomicU64,
    decode_failures: AtomicU64,
    delivered: AtomicU64,
}

impl ReceiveCounters {
    fn snapshot(&self) -> ReceiveStats {
        ReceiveStats {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Lifecycle of one receive task, embedded by each reader implementation
pub(crate) struct ReceiveLoop {
    addr: SocketAddr,
    capacity: usize,
    running: Option<RunningLoop>,
    counters: Arc<ReceiveCounters>,
    errors: Option<mpsc::UnboundedSender<TransportError>>,
}

impl ReceiveLoop {
    pub(crate) fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            capacity: DEFAULT_RECV_CAPACITY,
            running: None,
            counters: Arc::new(ReceiveCounters::default()),
            errors: None,
        }
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub(crate) fn ensure_stopped(&self) -> Result<(), TransportError> {
        if self.running.is_some() {
            return Err(TransportError::AlreadyReceiving(self.addr));
        }
        Ok(())
    }

    /// Spawn the receive task over an already bound socket
    pub(crate) fn start(&mut self, socket: UdpSocket, tag: &str) -> Result<mpsc::Receiver<Envelope>, TransportError> {
        self.ensure_stopped()?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = ReceiveTask {
            socket,
            addr: self.addr,
            tag: tag.to_string(),
            tx,
            stop_rx,
            counters: self.counters.clone(),
            errors: self.errors.clone(),
        };

        info!(tag = %tag, addr = %self.addr, "Starting receive loop");
        let handle = tokio::spawn(task.run());
        self.running = Some(RunningLoop { stop_tx, handle });

        Ok(rx)
    }

    pub(crate) async fn stop(&mut self) -> Result<(), TransportError> {
        let running = self
            .running
            .take()
            .ok_or(TransportError::NotReceiving(self.addr))?;

        // The task may already be gone if it panicked; the join below reports that.
        let _ = running.stop_tx.send(true);
        running
            .handle
            .await
            .map_err(|_| TransportError::TaskFailed(self.addr))?;

        debug!(addr = %self.addr, "Receive loop stopped");
        Ok(())
    }

    pub(crate) fn stats(&self) -> ReceiveStats {
        self.counters.snapshot()
    }

    pub(crate) fn set_error_sink(&mut self, sink: mpsc::UnboundedSender<TransportError>) {
        self.errors = Some(sink);
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
        }
    }
}

struct ReceiveTask {
    socket: UdpSocket,
    addr: SocketAddr,
    tag: String,
    tx: mpsc::Sender<Envelope>,
    stop_rx: watch::Receiver<bool>,
    counters: Arc<ReceiveCounters>,
    errors: Option<mpsc::UnboundedSender<TransportError>>,
}

impl ReceiveTask {
    async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            if *self.stop_rx.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, src) = match received {
                Ok(read) => read,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    warn!(tag = %self.tag, addr = %self.addr, "Receive failure: {}", e);
                    self.report(TransportError::Receive {
                        addr: self.addr,
                        source: e,
                    });
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    continue;
                }
            };

            self.counters.datagrams.fetch_add(1, Ordering::Relaxed);
            if len == 0 {
                self.counters.empty.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            debug!(tag = %self.tag, src = %src, len, "Got datagram");

            let envelope = match Envelope::decode(&buf[..len]) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(tag = %self.tag, src = %src, "Dropping undecodable datagram: {}", e);
                    self.report(TransportError::Decode { src, source: e });
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                sent = self.tx.send(envelope) => match sent {
                    Ok(()) => {
                        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        debug!(tag = %self.tag, "Consumer closed the stream; discarding envelope");
                    }
                },
            }
        }

        debug!(tag = %self.tag, addr = %self.addr, "Receive task exiting");
    }

    fn report(&self, error: TransportError) {
        if let Some(ref errors) = self.errors {
            let _ = errors.send(error);
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Resolve a `host:port` string to its first IPv4 socket address
pub fn resolve_ipv4(addr: &str) -> Result<SocketAddr, TransportError> {
    let candidates = addr.to_socket_addrs().map_err(|e| TransportError::Resolve {
        addr: addr.to_string(),
        source: e,
    })?;

    candidates
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| TransportError::NoIpv4(addr.to_string()))
}
