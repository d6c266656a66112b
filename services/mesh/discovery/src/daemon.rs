//! Announce daemon.
//!
//! A running daemon owns two tasks:
//!
//! - the **send task** announces on a fixed interval, and immediately whenever
//!   the receive task reports a table change
//! - the **receive task** consumes the protocol stream and updates the
//!   neighbor table
//!
//! Both tasks observe the same stop signal at the top of their loops.

use crate::convergence::ConvergenceHash;
use crate::error::DiscoveryError;
use crate::table::{NeighborTable, Observation};
use mesh_transport::DatagramWriter;
use mesh_wire::{AnnouncePacket, AnnounceRecord, Envelope, NodeIdentity, DEFAULT_LINK_COST};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default announce interval
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

/// Announce daemon configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceConfig {
    /// Period of the send task
    pub interval: Duration,
    /// Process announces carrying the local identity (loopback testing)
    pub accept_own_packets: bool,
    /// Drop neighbors not heard from within this period; `None` keeps them forever
    pub neighbor_ttl: Option<Duration>,
    /// Cost recorded for every directly heard neighbor
    pub link_cost: u32,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_ANNOUNCE_INTERVAL,
            accept_own_packets: false,
            neighbor_ttl: None,
            link_cost: DEFAULT_LINK_COST,
        }
    }
}

impl AnnounceConfig {
    /// Reject settings the send task cannot run with
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "announce interval must be non-zero".to_string(),
            ));
        }
        if self.neighbor_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(DiscoveryError::InvalidConfig(
                "neighbor ttl must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Daemon lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// No tasks running
    Stopped,
    /// Send and receive tasks running
    Running,
    /// Stop signalled, waiting for the tasks
    Stopping,
}

struct RunningDaemon {
    stop_tx: watch::Sender<bool>,
    send_task: JoinHandle<()>,
    receive_task: JoinHandle<()>,
}

/// Discovery protocol daemon for one node
pub struct AnnounceDaemon {
    identity: NodeIdentity,
    config: AnnounceConfig,
    writer: Arc<dyn DatagramWriter>,
    table: Arc<NeighborTable>,
    sequence: Arc<AtomicU64>,
    errors: mpsc::UnboundedSender<DiscoveryError>,
    state: DaemonState,
    running: Option<RunningDaemon>,
}

impl AnnounceDaemon {
    /// Create a stopped daemon.
    ///
    /// Transient failures (protocol mismatch, failed transmit) are sent on `errors`.
    pub fn new(
        identity: NodeIdentity,
        writer: Arc<dyn DatagramWriter>,
        config: AnnounceConfig,
        errors: mpsc::UnboundedSender<DiscoveryError>,
    ) -> Self {
        Self {
            identity,
            config,
            writer,
            table: Arc::new(NeighborTable::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            errors,
            state: DaemonState::Stopped,
            running: None,
        }
    }

    /// Launch the send and receive tasks over the given protocol stream
    pub fn start(&mut self, inbound: mpsc::Receiver<Envelope>) -> Result<(), DiscoveryError> {
        if self.state != DaemonState::Stopped {
            return Err(DiscoveryError::AlreadyRunning);
        }
        self.config.validate()?;

        info!(
            node = %self.identity,
            writer = %self.writer.remote_addr(),
            interval = ?self.config.interval,
            "Starting announce daemon"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        // One pending trigger is enough; the announce reads the table when it runs.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let announcer = Announcer {
            identity: self.identity.clone(),
            writer: self.writer.clone(),
            table: self.table.clone(),
            neighbor_ttl: self.config.neighbor_ttl,
            sequence: self.sequence.load(Ordering::Relaxed),
            published: self.sequence.clone(),
            last_hash: None,
            errors: self.errors.clone(),
        };
        let send_task = tokio::spawn(run_send_task(
            announcer,
            self.config.interval,
            trigger_rx,
            stop_rx.clone(),
        ));

        let handler = AnnounceHandler {
            identity: self.identity.clone(),
            accept_own_packets: self.config.accept_own_packets,
            link_cost: self.config.link_cost,
            table: self.table.clone(),
            trigger: trigger_tx,
            errors: self.errors.clone(),
        };
        let receive_task = tokio::spawn(run_receive_task(handler, inbound, stop_rx));

        self.running = Some(RunningDaemon {
            stop_tx,
            send_task,
            receive_task,
        });
        self.state = DaemonState::Running;

        info!("Announce daemon started");
        Ok(())
    }

    /// Signal both tasks and wait until they have exited
    pub async fn stop(&mut self) -> Result<(), DiscoveryError> {
        let running = self.running.take().ok_or(DiscoveryError::NotRunning)?;
        self.state = DaemonState::Stopping;

        let _ = running.stop_tx.send(true);

        let receive = running.receive_task.await;
        let send = running.send_task.await;
        self.state = DaemonState::Stopped;

        receive.map_err(|_| DiscoveryError::TaskFailed("announce receive"))?;
        send.map_err(|_| DiscoveryError::TaskFailed("announce send"))?;

        debug!(node = %self.identity, "Announce daemon stopped");
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Local identity
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Sequence number carried by the most recent announce
    pub fn sequence_number(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Shared neighbor table
    pub fn table(&self) -> Arc<NeighborTable> {
        self.table.clone()
    }

    /// Copy of the neighbor table ordered by name
    pub fn neighbors(&self) -> BTreeMap<String, AnnounceRecord> {
        self.table.snapshot()
    }
}

impl Drop for AnnounceDaemon {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
        }
    }
}

/// State owned by the send task
struct Announcer {
    identity: NodeIdentity,
    writer: Arc<dyn DatagramWriter>,
    table: Arc<NeighborTable>,
    neighbor_ttl: Option<Duration>,
    sequence: u64,
    published: Arc<AtomicU64>,
    last_hash: Option<ConvergenceHash>,
    errors: mpsc::UnboundedSender<DiscoveryError>,
}

impl Announcer {
    /// Advance the sequence number if the table changed, then always transmit
    async fn announce(&mut self) {
        if let Some(ttl) = self.neighbor_ttl {
            for name in self.table.expire(ttl) {
                info!(node = %name, "Neighbor expired");
            }
        }

        let snapshot = self.table.snapshot();
        let hash = ConvergenceHash::compute(&snapshot);
        if self.last_hash != Some(hash) {
            self.sequence += 1;
            self.last_hash = Some(hash);
            self.published.store(self.sequence, Ordering::Relaxed);
            debug!(seq = self.sequence, hash = ?hash, "Neighbor table changed");
        }

        debug!(seq = self.sequence, neighbors = snapshot.len(), "Announcing");
        let packet = AnnouncePacket::from_snapshot(self.sequence, self.identity.clone(), &snapshot);
        if let Err(e) = self.writer.write(&Envelope::Announce(packet)).await {
            warn!(seq = self.sequence, "Announce transmit failed: {}", e);
            let _ = self.errors.send(DiscoveryError::Transmit(e));
        }
    }
}

async fn run_send_task(
    mut announcer: Announcer,
    interval: Duration,
    mut trigger_rx: mpsc::Receiver<()>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *stop_rx.borrow() {
            break;
        }

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => announcer.announce().await,
            Some(()) = trigger_rx.recv() => announcer.announce().await,
        }
    }

    debug!("Announce send task exiting");
}

/// State owned by the receive task
struct AnnounceHandler {
    identity: NodeIdentity,
    accept_own_packets: bool,
    link_cost: u32,
    table: Arc<NeighborTable>,
    trigger: mpsc::Sender<()>,
    errors: mpsc::UnboundedSender<DiscoveryError>,
}

impl AnnounceHandler {
    fn handle(&self, envelope: Envelope) {
        let packet = match envelope {
            Envelope::Announce(packet) => packet,
            other => {
                warn!(kind = %other.kind(), "Non-announce message on protocol stream");
                let _ = self.errors.send(DiscoveryError::ProtocolMismatch(other.kind()));
                return;
            }
        };

        if packet.identity == self.identity && !self.accept_own_packets {
            return;
        }

        let seq = packet.sequence_number();
        let record = AnnounceRecord::from_packet(&packet, self.link_cost);
        match self.table.observe(record) {
            Observation::Inserted => {
                info!(peer = %packet.identity, seq, "Discovered neighbor");
                self.trigger_announce();
            }
            Observation::Replaced => {
                debug!(peer = %packet.identity, seq, "Neighbor updated");
                self.trigger_announce();
            }
            Observation::Stale => {}
        }
    }

    fn trigger_announce(&self) {
        match self.trigger.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => debug!("Send task gone; announce not triggered"),
        }
    }
}

async fn run_receive_task(
    handler: AnnounceHandler,
    mut inbound: mpsc::Receiver<Envelope>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            envelope = inbound.recv() => match envelope {
                Some(envelope) => handler.handle(envelope),
                None => {
                    debug!("Protocol stream closed; waiting for stop");
                    while !*stop_rx.borrow() {
                        if stop_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            },
        }
    }

    debug!("Announce receive task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mesh_transport::MemoryWriter;
    use mesh_wire::{DataMessage, MessageKind};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        daemon: AnnounceDaemon,
        inbound: mpsc::Sender<Envelope>,
        sent: UnboundedReceiver<Envelope>,
        errors: UnboundedReceiver<DiscoveryError>,
    }

    fn local() -> NodeIdentity {
        NodeIdentity::new("local", "127.0.0.1:1146")
    }

    fn harness(config: AnnounceConfig) -> Harness {
        let (writer, sent) = MemoryWriter::new("127.0.0.1:1145".parse().unwrap());
        let (err_tx, errors) = mpsc::unbounded_channel();
        let (inbound, inbound_rx) = mpsc::channel(16);

        let mut daemon = AnnounceDaemon::new(local(), Arc::new(writer), config, err_tx);
        daemon.start(inbound_rx).unwrap();

        Harness {
            daemon,
            inbound,
            sent,
            errors,
        }
    }

    fn fast() -> AnnounceConfig {
        AnnounceConfig {
            interval: Duration::from_millis(100),
            ..Default::default()
        }
    }

    async fn next_announce(sent: &mut UnboundedReceiver<Envelope>) -> AnnouncePacket {
        match sent.recv().await {
            Some(Envelope::Announce(packet)) => packet,
            other => panic!("expected announce, got {:?}", other),
        }
    }

    fn peer_announce(name: &str, seq: u64) -> Envelope {
        Envelope::Announce(AnnouncePacket::new(
            seq,
            NodeIdentity::new(name, format!("{}.local:1146", name)),
            BTreeMap::new(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_table_transmits_without_advancing() {
        let mut h = harness(fast());

        let first = next_announce(&mut h.sent).await;
        let second = next_announce(&mut h.sent).await;
        let third = next_announce(&mut h.sent).await;

        assert_eq!(first.sequence_number(), 1);
        assert_eq!(second.sequence_number(), 1);
        assert_eq!(third.sequence_number(), 1);
        assert_eq!(first.identity, local());
        assert!(third.neighbors.is_empty());

        h.daemon.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_neighbor_advances_and_announces_immediately() {
        let mut h = harness(fast());
        assert_eq!(next_announce(&mut h.sent).await.sequence_number(), 1);

        let before = Instant::now();
        h.inbound.send(peer_announce("peer", 1)).await.unwrap();

        let packet = next_announce(&mut h.sent).await;
        assert!(packet.neighbors.contains_key("peer"));
        assert_eq!(packet.sequence_number(), 2);
        // Out-of-band, not on the next tick.
        assert!(before.elapsed() < Duration::from_millis(100));
        assert_eq!(h.daemon.sequence_number(), 2);

        h.daemon.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_announce_leaves_table_unchanged() {
        let mut h = harness(fast());

        h.inbound.send(peer_announce("peer", 5)).await.unwrap();
        h.inbound.send(peer_announce("peer", 5)).await.unwrap();
        h.inbound.send(peer_announce("peer", 3)).await.unwrap();

        // Wait for the first announce that reflects the peer.
        loop {
            if next_announce(&mut h.sent).await.neighbors.contains_key("peer") {
                break;
            }
        }

        assert_eq!(h.daemon.neighbors()["peer"].sequence_number, 5);

        h.inbound.send(peer_announce("peer", 6)).await.unwrap();
        loop {
            let packet = next_announce(&mut h.sent).await;
            if packet.neighbors["peer"].sequence_number == 6 {
                break;
            }
        }

        h.daemon.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_packets_discarded_by_default() {
        let mut h = harness(fast());

        h.inbound
            .send(Envelope::Announce(AnnouncePacket::new(9, local(), BTreeMap::new())))
            .await
            .unwrap();
        next_announce(&mut h.sent).await;
        next_announce(&mut h.sent).await;

        assert!(h.daemon.neighbors().is_empty());
        h.daemon.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_packets_accepted_when_configured() {
        let mut h = harness(AnnounceConfig {
            accept_own_packets: true,
            ..fast()
        });

        h.inbound
            .send(Envelope::Announce(AnnouncePacket::new(1, local(), BTreeMap::new())))
            .await
            .unwrap();

        loop {
            if next_announce(&mut h.sent).await.neighbors.contains_key("local") {
                break;
            }
        }
        h.daemon.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_announce_reported_as_protocol_mismatch() {
        let mut h = harness(fast());

        h.inbound
            .send(Envelope::Data(DataMessage::new("peer", 1, Bytes::from_static(b"x"))))
            .await
            .unwrap();

        match h.errors.recv().await {
            Some(DiscoveryError::ProtocolMismatch(kind)) => assert_eq!(kind, MessageKind::Data),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.daemon.state(), DaemonState::Running);

        h.daemon.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_transmit_reported_and_daemon_keeps_running() {
        let h = harness(fast());
        let Harness {
            mut daemon,
            inbound: _inbound,
            sent,
            mut errors,
        } = h;
        drop(sent);

        for _ in 0..2 {
            assert!(matches!(errors.recv().await, Some(DiscoveryError::Transmit(_))));
        }
        assert_eq!(daemon.state(), DaemonState::Running);

        daemon.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_neighbor_expiry_advances_sequence() {
        let mut h = harness(AnnounceConfig {
            neighbor_ttl: Some(Duration::from_millis(250)),
            ..fast()
        });

        h.inbound.send(peer_announce("peer", 1)).await.unwrap();
        let seq_with_peer = loop {
            let packet = next_announce(&mut h.sent).await;
            if packet.neighbors.contains_key("peer") {
                break packet.sequence_number();
            }
        };

        let after_expiry = loop {
            let packet = next_announce(&mut h.sent).await;
            if packet.neighbors.is_empty() {
                break packet.sequence_number();
            }
        };

        assert_eq!(after_expiry, seq_with_peer + 1);
        h.daemon.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_neighbor_is_never_expired() {
        let mut h = harness(AnnounceConfig {
            neighbor_ttl: Some(Duration::from_millis(250)),
            ..fast()
        });

        h.inbound.send(peer_announce("peer", 1)).await.unwrap();
        let seq_with_peer = loop {
            let packet = next_announce(&mut h.sent).await;
            if packet.neighbors.contains_key("peer") {
                break packet.sequence_number();
            }
        };

        // The peer's own table is unchanged, so it keeps sending seq 1.
        for _ in 0..20 {
            h.inbound.send(peer_announce("peer", 1)).await.unwrap();
            let packet = next_announce(&mut h.sent).await;
            assert!(packet.neighbors.contains_key("peer"), "live neighbor expired");
            assert_eq!(packet.sequence_number(), seq_with_peer);
        }

        assert_eq!(h.daemon.sequence_number(), seq_with_peer);
        h.daemon.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_rejected_at_start() {
        let (writer, _sent) = MemoryWriter::new("127.0.0.1:1145".parse().unwrap());
        let (err_tx, _errors) = mpsc::unbounded_channel();
        let config = AnnounceConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        let mut daemon = AnnounceDaemon::new(local(), Arc::new(writer), config, err_tx);

        let (_tx, rx) = mpsc::channel(1);
        assert!(matches!(daemon.start(rx), Err(DiscoveryError::InvalidConfig(_))));
        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert!(matches!(daemon.stop().await, Err(DiscoveryError::NotRunning)));
    }

    #[test]
    fn test_zero_neighbor_ttl_rejected() {
        let config = AnnounceConfig {
            neighbor_ttl: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DiscoveryError::InvalidConfig(_))));
        assert!(AnnounceConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let (writer, _sent) = MemoryWriter::new("127.0.0.1:1145".parse().unwrap());
        let (err_tx, _errors) = mpsc::unbounded_channel();
        let mut daemon = AnnounceDaemon::new(local(), Arc::new(writer), fast(), err_tx);

        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert!(matches!(daemon.stop().await, Err(DiscoveryError::NotRunning)));

        let (_tx, rx) = mpsc::channel(1);
        daemon.start(rx).unwrap();
        assert_eq!(daemon.state(), DaemonState::Running);

        let (_tx2, rx2) = mpsc::channel(1);
        assert!(matches!(daemon.start(rx2), Err(DiscoveryError::AlreadyRunning)));

        daemon.stop().await.unwrap();
        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert!(matches!(daemon.stop().await, Err(DiscoveryError::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_closed_protocol_stream() {
        let mut h = harness(fast());
        drop(h.inbound);

        next_announce(&mut h.sent).await;
        h.daemon.stop().await.unwrap();
    }
}
