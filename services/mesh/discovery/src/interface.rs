//! Network interface: the composition point joining transport endpoints to an
//! announce daemon.
//!
//! Inbound envelopes from the data endpoint (and the optional separate announce
//! endpoint) pass through one demultiplexing task. Announces go to the daemon's
//! protocol stream; every other kind goes to the application stream.

use crate::daemon::{AnnounceConfig, AnnounceDaemon};
use crate::error::DiscoveryError;
use crate::table::NeighborTable;
use mesh_transport::{DatagramReader, DatagramWriter, TransportError, DEFAULT_RECV_CAPACITY};
use mesh_wire::{AnnounceRecord, Envelope, NodeIdentity};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receive tag of the data endpoint
pub const DATA_TAG: &str = "data";
/// Receive tag of the announce endpoint
pub const ANNOUNCE_TAG: &str = "announce";

/// Dropped announces between two warnings
const DROP_WARN_EVERY: u64 = 64;

/// Network interface settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSettings {
    /// Announce daemon configuration
    pub announce: AnnounceConfig,
    /// Capacity of the protocol and application streams
    pub channel_capacity: usize,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        Self {
            announce: AnnounceConfig::default(),
            channel_capacity: DEFAULT_RECV_CAPACITY,
        }
    }
}

struct DemuxHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One node's view of the network
pub struct NetworkInterface {
    data_reader: Box<dyn DatagramReader>,
    announce_reader: Option<Box<dyn DatagramReader>>,
    daemon: AnnounceDaemon,
    protocol_rx: Option<mpsc::Receiver<Envelope>>,
    messages_rx: Option<mpsc::Receiver<Envelope>>,
    errors_rx: Option<mpsc::UnboundedReceiver<DiscoveryError>>,
    dropped_announces: Arc<AtomicU64>,
    demux: Option<DemuxHandle>,
}

impl NetworkInterface {
    /// Start the receive loops and the demultiplexing task.
    ///
    /// With `announce_reader` set to `None`, announces are expected on the data
    /// endpoint. The announce daemon is created but not started; see
    /// [`NetworkInterface::start_announce`].
    pub async fn new(
        identity: NodeIdentity,
        mut data_reader: Box<dyn DatagramReader>,
        mut announce_reader: Option<Box<dyn DatagramReader>>,
        announce_writer: Arc<dyn DatagramWriter>,
        settings: InterfaceSettings,
    ) -> Result<Self, DiscoveryError> {
        settings.announce.validate()?;

        let capacity = settings.channel_capacity.max(1);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        data_reader.set_error_sink(transport_tx.clone());
        let data_rx = data_reader.start_receiving(DATA_TAG).await?;

        let announce_rx = match announce_reader.as_mut() {
            Some(reader) => {
                reader.set_error_sink(transport_tx);
                match reader.start_receiving(ANNOUNCE_TAG).await {
                    Ok(rx) => Some(rx),
                    Err(e) => {
                        if let Err(stop_err) = data_reader.stop_receiving().await {
                            warn!("Failed to stop data reader after announce bind failure: {}", stop_err);
                        }
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        let (protocol_tx, protocol_rx) = mpsc::channel(capacity);
        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let dropped_announces = Arc::new(AtomicU64::new(0));

        let demux = Demultiplexer {
            data_rx,
            announce_rx,
            transport_rx,
            protocol_tx,
            messages_tx,
            errors: errors_tx.clone(),
            dropped_announces: dropped_announces.clone(),
            stop_rx,
        };
        let handle = tokio::spawn(demux.run());

        info!(
            node = %identity,
            data = %data_reader.local_addr(),
            announce = ?announce_reader.as_ref().map(|r| r.local_addr()),
            "Network interface up"
        );

        let daemon = AnnounceDaemon::new(identity, announce_writer, settings.announce, errors_tx);

        Ok(Self {
            data_reader,
            announce_reader,
            daemon,
            protocol_rx: Some(protocol_rx),
            messages_rx: Some(messages_rx),
            errors_rx: Some(errors_rx),
            dropped_announces,
            demux: Some(DemuxHandle { stop_tx, handle }),
        })
    }

    /// Start the announce daemon on the protocol stream
    pub fn start_announce(&mut self) -> Result<(), DiscoveryError> {
        let protocol_rx = self.protocol_rx.take().ok_or(DiscoveryError::AlreadyRunning)?;
        self.daemon.start(protocol_rx)
    }

    /// Application message stream; available once
    pub fn take_message_receiver(&mut self) -> Option<mpsc::Receiver<Envelope>> {
        self.messages_rx.take()
    }

    /// Transient error stream; available once
    pub fn take_error_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<DiscoveryError>> {
        self.errors_rx.take()
    }

    /// Local identity
    pub fn identity(&self) -> &NodeIdentity {
        self.daemon.identity()
    }

    /// Address of the data endpoint
    pub fn data_addr(&self) -> SocketAddr {
        self.data_reader.local_addr()
    }

    /// Local announce sequence number
    pub fn sequence_number(&self) -> u64 {
        self.daemon.sequence_number()
    }

    /// Copy of the neighbor table ordered by name
    pub fn neighbors(&self) -> BTreeMap<String, AnnounceRecord> {
        self.daemon.neighbors()
    }

    /// Announces discarded because the protocol stream was full or closed
    pub fn dropped_announces(&self) -> u64 {
        self.dropped_announces.load(Ordering::Relaxed)
    }

    /// Shared neighbor table
    pub fn neighbor_table(&self) -> Arc<NeighborTable> {
        self.daemon.table()
    }

    /// Shut down in dependency order.
    ///
    /// Stops the data receive loop, the announce receive loop, and the daemon,
    /// then the demultiplexer. The application and error streams end after this
    /// returns. Every step runs even if an earlier one fails; the first failure
    /// is returned.
    pub async fn close(mut self) -> Result<(), DiscoveryError> {
        let mut result = Ok(());

        if let Err(e) = self.data_reader.stop_receiving().await {
            warn!("Failed to stop data reader: {}", e);
            keep_first(&mut result, e.into());
        }

        if let Some(reader) = self.announce_reader.as_mut() {
            if let Err(e) = reader.stop_receiving().await {
                warn!("Failed to stop announce reader: {}", e);
                keep_first(&mut result, e.into());
            }
        }

        match self.daemon.stop().await {
            Ok(()) | Err(DiscoveryError::NotRunning) => {}
            Err(e) => {
                warn!("Failed to stop announce daemon: {}", e);
                keep_first(&mut result, e);
            }
        }

        if let Some(demux) = self.demux.take() {
            let _ = demux.stop_tx.send(true);
            if demux.handle.await.is_err() {
                keep_first(&mut result, DiscoveryError::TaskFailed("demultiplexer"));
            }
        }

        info!(node = %self.daemon.identity(), "Network interface closed");
        result
    }
}

impl Drop for NetworkInterface {
    fn drop(&mut self) {
        if let Some(demux) = self.demux.take() {
            let _ = demux.stop_tx.send(true);
        }
    }
}

fn keep_first(result: &mut Result<(), DiscoveryError>, error: DiscoveryError) {
    if result.is_ok() {
        *result = Err(error);
    }
}

struct Demultiplexer {
    data_rx: mpsc::Receiver<Envelope>,
    announce_rx: Option<mpsc::Receiver<Envelope>>,
    transport_rx: mpsc::UnboundedReceiver<TransportError>,
    protocol_tx: mpsc::Sender<Envelope>,
    messages_tx: mpsc::Sender<Envelope>,
    errors: mpsc::UnboundedSender<DiscoveryError>,
    dropped_announces: Arc<AtomicU64>,
    stop_rx: watch::Receiver<bool>,
}

impl Demultiplexer {
    async fn run(mut self) {
        loop {
            if *self.stop_rx.borrow() {
                break;
            }

            let envelope = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break,
                Some(error) = self.transport_rx.recv() => {
                    let _ = self.errors.send(DiscoveryError::Transport(error));
                    continue;
                }
                Some(envelope) = self.data_rx.recv() => envelope,
                Some(envelope) = recv_optional(&mut self.announce_rx) => envelope,
            };

            match envelope {
                Envelope::Announce(_) => self.forward_announce(envelope),
                Envelope::Header(_) | Envelope::Data(_) => {
                    tokio::select! {
                        biased;
                        _ = self.stop_rx.changed() => break,
                        sent = self.messages_tx.send(envelope) => {
                            if sent.is_err() {
                                debug!("Application stream closed; discarding message");
                            }
                        }
                    }
                }
            }
        }

        debug!("Demultiplexer exiting");
    }

    fn forward_announce(&self, envelope: Envelope) {
        // Announces repeat every interval, so a full protocol stream drops rather than blocks.
        let reason = match self.protocol_tx.try_send(envelope) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => "full",
            Err(TrySendError::Closed(_)) => "closed",
        };

        let dropped = self.dropped_announces.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % DROP_WARN_EVERY == 0 {
            warn!(dropped, "Protocol stream {}; dropping announces", reason);
        } else {
            debug!(dropped, "Protocol stream {}; dropping announce", reason);
        }
    }
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<Envelope>>) -> Option<Envelope> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
