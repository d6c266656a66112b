//! Mesh discovery node binary.
//!
//! Runs one network interface: a data endpoint, an announce endpoint (unicast
//! or multicast), and the announce daemon. The derived route table is logged
//! periodically until the process receives SIGINT or SIGTERM.

use anyhow::{anyhow, Context};
use clap::Parser;
use mesh_discovery::{AnnounceConfig, InterfaceSettings, NetworkInterface};
use mesh_topology::{compute_routes, derive_graph};
use mesh_transport::{DatagramReader, MulticastReader, UdpWriter, UnicastReader};
use mesh_wire::{Envelope, NodeIdentity, DEFAULT_LINK_COST};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::NodeConfig;
use logging::MeshLogFormatter;

/// Mesh discovery node
#[derive(Parser, Debug)]
#[command(name = "mesh-node", version, about = "Mesh neighbor discovery node")]
struct Args {
    /// Unique node name (required here, in the config file, or via MESH_NODE_NAME)
    #[arg(short = 'n', long)]
    node_name: Option<String>,

    /// Address peers reach this node at [default: data listen address with a routable IP]
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Address announces are sent to [default: 239.0.0.0:1145]
    #[arg(long)]
    announce_addr: Option<String>,

    /// Local address of the unicast announce endpoint [default: 0.0.0.0:1145]
    #[arg(long)]
    announce_listen_addr: Option<String>,

    /// Join the announce address as a multicast group
    #[arg(short = 'm', long)]
    announce_multicast: bool,

    /// Local address of the data endpoint [default: 0.0.0.0:1146]
    #[arg(long)]
    data_listen_addr: Option<String>,

    /// Announce interval, e.g. 5s
    #[arg(short = 'i', long)]
    announce_interval: Option<humantime::Duration>,

    /// Process announces carrying this node's own identity
    #[arg(long)]
    accept_own_packets: bool,

    /// Forget neighbors not heard from within this period, e.g. 30s
    #[arg(long)]
    neighbor_ttl: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Configuration file path (YAML)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    /// Explicit flags take precedence over file and environment
    fn apply_to(&self, config: &mut NodeConfig) {
        if let Some(ref name) = self.node_name {
            config.node_name = Some(name.clone());
        }
        if let Some(ref addr) = self.advertise_addr {
            config.advertise_addr = Some(addr.clone());
        }
        if let Some(ref addr) = self.announce_addr {
            config.announce_addr = addr.clone();
        }
        if let Some(ref addr) = self.announce_listen_addr {
            config.announce_listen_addr = addr.clone();
        }
        if self.announce_multicast {
            config.announce_multicast = true;
        }
        if let Some(ref addr) = self.data_listen_addr {
            config.data_listen_addr = addr.clone();
        }
        if let Some(interval) = self.announce_interval {
            config.announce_interval = interval.into();
        }
        if self.accept_own_packets {
            config.accept_own_packets = true;
        }
        if let Some(ttl) = self.neighbor_ttl {
            config.neighbor_ttl = Some(ttl.into());
        }
    }

    fn effective_log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = args.effective_log_level();
    let env_filter = EnvFilter::new("info")
        .add_directive(format!("mesh_node={}", level).parse()?)
        .add_directive(format!("mesh_discovery={}", level).parse()?)
        .add_directive(format!("mesh_transport={}", level).parse()?)
        .add_directive(format!("mesh_topology={}", level).parse()?)
        .add_directive(format!("mesh_wire={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(MeshLogFormatter::new("mesh"))
        .init();

    info!("Starting mesh node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = NodeConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    let node_name = config
        .node_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| anyhow!("node name is required (--node-name, MESH_NODE_NAME, or node.name)"))?;
    let identity = NodeIdentity::new(node_name, config.advertised_address()?);

    info!(
        "Node {} announcing to {} every {:?} ({})",
        identity,
        config.announce_addr,
        config.announce_interval,
        if config.announce_multicast { "multicast" } else { "unicast" }
    );

    let data_reader: Box<dyn DatagramReader> = Box::new(
        UnicastReader::new(&config.data_listen_addr)
            .with_context(|| format!("invalid data listen address {}", config.data_listen_addr))?,
    );
    let announce_reader: Box<dyn DatagramReader> = if config.announce_multicast {
        Box::new(
            MulticastReader::new(&config.announce_addr)
                .with_context(|| format!("invalid announce group {}", config.announce_addr))?,
        )
    } else {
        Box::new(
            UnicastReader::new(&config.announce_listen_addr).with_context(|| {
                format!("invalid announce listen address {}", config.announce_listen_addr)
            })?,
        )
    };
    let announce_writer = Arc::new(
        UdpWriter::new(&config.announce_addr)
            .with_context(|| format!("invalid announce address {}", config.announce_addr))?,
    );

    let settings = InterfaceSettings {
        announce: AnnounceConfig {
            interval: config.announce_interval,
            accept_own_packets: config.accept_own_packets,
            neighbor_ttl: config.neighbor_ttl,
            link_cost: DEFAULT_LINK_COST,
        },
        ..Default::default()
    };

    let mut interface = NetworkInterface::new(
        identity.clone(),
        data_reader,
        Some(announce_reader),
        announce_writer,
        settings,
    )
    .await
    .context("failed to start network interface")?;
    interface.start_announce()?;

    let message_task = interface
        .take_message_receiver()
        .map(|mut messages| {
            tokio::spawn(async move {
                while let Some(envelope) = messages.recv().await {
                    match envelope {
                        Envelope::Data(message) => component_info!(
                            "data",
                            source = %message.source,
                            seq = message.sequence_number,
                            len = message.payload.len(),
                            "Application message"
                        ),
                        other => component_debug!("data", kind = %other.kind(), "Application message"),
                    }
                }
            })
        });

    let error_task = interface.take_error_receiver().map(|mut errors| {
        tokio::spawn(async move {
            while let Some(error) = errors.recv().await {
                component_warn!("discovery", "{}", error);
            }
        })
    });

    info!("Mesh node started. Waiting for neighbors...");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to install SIGTERM handler: {}", e))?;

    let route_logger = log_routes_every(&interface, &identity, config.announce_interval);
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM signal, shutting down"),
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT signal, shutting down"),
        _ = route_logger => {}
    }

    interface.close().await.context("failed to close network interface")?;

    // Both streams end once the interface is closed.
    for task in [message_task, error_task].into_iter().flatten() {
        if task.await.is_err() {
            component_error!("node", "Stream logger task failed");
        }
    }

    info!("Mesh node stopped");
    Ok(())
}

/// Log the derived route table on every tick
async fn log_routes_every(interface: &NetworkInterface, identity: &NodeIdentity, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    let mut last_count = None;

    loop {
        ticker.tick().await;

        let snapshot = interface.neighbors();
        let routes = match derive_graph(identity, &snapshot)
            .and_then(|graph| compute_routes(&graph, &identity.name))
        {
            Ok(routes) => routes,
            Err(e) => {
                component_warn!("topology", "Route computation failed: {}", e);
                continue;
            }
        };

        if last_count != Some(routes.len()) {
            component_info!(
                "topology",
                neighbors = snapshot.len(),
                routes = routes.len(),
                seq = interface.sequence_number(),
                "Topology changed"
            );
            last_count = Some(routes.len());
        }

        for route in routes.values() {
            component_debug!(
                "topology",
                "Route to {} via {} (cost: {}, hops: {})",
                route.destination,
                route.next_hop,
                route.total_cost,
                route.hop_count
            );
        }
    }
}
