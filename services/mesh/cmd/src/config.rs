//! Configuration handling for the mesh node.
//!
//! Values are layered: built-in defaults, then the optional YAML config file,
//! then `MESH_*` environment variables, then explicit command line flags.

use anyhow::{bail, Context, Result};
use mesh_transport::{outbound_ipv4, resolve_ipv4};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default multicast group for announces
pub const DEFAULT_ANNOUNCE_ADDR: &str = "239.0.0.0:1145";
/// Default local address for the announce endpoint
pub const DEFAULT_ANNOUNCE_LISTEN_ADDR: &str = "0.0.0.0:1145";
/// Default local address for the data endpoint
pub const DEFAULT_DATA_LISTEN_ADDR: &str = "0.0.0.0:1146";
/// Default announce interval in seconds
pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u64 = 5;

/// Mesh node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node name; required before the node can start
    pub node_name: Option<String>,
    /// Address peers use to reach this node; derived from the data endpoint when unset
    pub advertise_addr: Option<String>,
    /// Address announces are written to
    pub announce_addr: String,
    /// Local address of the unicast announce endpoint
    pub announce_listen_addr: String,
    /// Join `announce_addr` as a multicast group instead of listening on `announce_listen_addr`
    pub announce_multicast: bool,
    /// Local address of the data endpoint
    pub data_listen_addr: String,
    /// Announce interval
    pub announce_interval: Duration,
    /// Process announces carrying our own identity
    pub accept_own_packets: bool,
    /// Expire neighbors not heard from within this period
    pub neighbor_ttl: Option<Duration>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: None,
            advertise_addr: None,
            announce_addr: DEFAULT_ANNOUNCE_ADDR.to_string(),
            announce_listen_addr: DEFAULT_ANNOUNCE_LISTEN_ADDR.to_string(),
            announce_multicast: false,
            data_listen_addr: DEFAULT_DATA_LISTEN_ADDR.to_string(),
            announce_interval: Duration::from_secs(DEFAULT_ANNOUNCE_INTERVAL_SECS),
            accept_own_packets: false,
            neighbor_ttl: None,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Default, Deserialize)]
struct RootConfig {
    node: Option<NodeSection>,
    announce: Option<AnnounceSection>,
    data: Option<DataSection>,
}

#[derive(Debug, Deserialize)]
struct NodeSection {
    name: Option<String>,
    advertise_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnnounceSection {
    addr: Option<String>,
    listen_addr: Option<String>,
    multicast: Option<bool>,
    interval_secs: Option<u64>,
    accept_own_packets: Option<bool>,
    neighbor_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DataSection {
    listen_addr: Option<String>,
}

impl NodeConfig {
    /// Load configuration from an optional file and the environment.
    ///
    /// A missing or unparsable file is not an error; defaults are used.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                    Ok(root_config) => {
                        config.apply_root_config(root_config);
                        info!("Loaded configuration from {:?}", path);
                    }
                    Err(e) => warn!("Failed to parse config file {:?}, using defaults: {}", path, e),
                },
                Err(_) => warn!("Config file {:?} not found, using defaults", path),
            }
        }

        config.apply_environment_overrides();
        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(node) = root_config.node {
            if node.name.is_some() {
                self.node_name = node.name;
            }
            if node.advertise_addr.is_some() {
                self.advertise_addr = node.advertise_addr;
            }
        }

        if let Some(announce) = root_config.announce {
            if let Some(addr) = announce.addr {
                self.announce_addr = addr;
            }
            if let Some(listen_addr) = announce.listen_addr {
                self.announce_listen_addr = listen_addr;
            }
            if let Some(multicast) = announce.multicast {
                self.announce_multicast = multicast;
            }
            if let Some(secs) = announce.interval_secs {
                self.announce_interval = Duration::from_secs(secs);
            }
            if let Some(accept) = announce.accept_own_packets {
                self.accept_own_packets = accept;
            }
            if let Some(secs) = announce.neighbor_ttl_secs {
                self.neighbor_ttl = Some(Duration::from_secs(secs));
            }
        }

        if let Some(data) = root_config.data {
            if let Some(listen_addr) = data.listen_addr {
                self.data_listen_addr = listen_addr;
            }
        }
    }

    fn apply_environment_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `MESH_*` overrides from a variable lookup
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("MESH_NODE_NAME") {
            info!("Node name overridden by environment: {}", name);
            self.node_name = Some(name);
        }

        if let Some(addr) = lookup("MESH_ADVERTISE_ADDR") {
            info!("Advertised address overridden by environment: {}", addr);
            self.advertise_addr = Some(addr);
        }

        if let Some(addr) = lookup("MESH_ANNOUNCE_ADDR") {
            info!("Announce address overridden by environment: {}", addr);
            self.announce_addr = addr;
        }

        if let Some(addr) = lookup("MESH_DATA_LISTEN_ADDR") {
            info!("Data listen address overridden by environment: {}", addr);
            self.data_listen_addr = addr;
        }

        if let Some(secs) = lookup("MESH_ANNOUNCE_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => {
                    self.announce_interval = Duration::from_secs(secs);
                    info!("Announce interval overridden by environment: {}s", secs);
                }
                Err(_) => warn!("Ignoring invalid MESH_ANNOUNCE_INTERVAL_SECS: {}", secs),
            }
        }
    }

    /// Reject values the node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.announce_interval.is_zero() {
            bail!("announce interval must be greater than zero");
        }
        if self.neighbor_ttl.is_some_and(|ttl| ttl.is_zero()) {
            bail!("neighbor ttl must be greater than zero");
        }
        Ok(())
    }

    /// Address put into this node's identity.
    ///
    /// An explicit `advertise_addr` wins. Otherwise the data listen address is
    /// used, with a wildcard IP replaced by the interface that routes to the
    /// announce address.
    pub fn advertised_address(&self) -> Result<String> {
        self.advertised_address_with(|remote| match outbound_ipv4(remote) {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!("No route to {}: {}", remote, e);
                None
            }
        })
    }

    fn advertised_address_with(
        &self,
        outbound: impl Fn(SocketAddr) -> Option<Ipv4Addr>,
    ) -> Result<String> {
        if let Some(ref addr) = self.advertise_addr {
            return Ok(addr.clone());
        }

        let listen = resolve_ipv4(&self.data_listen_addr)
            .with_context(|| format!("invalid data listen address {}", self.data_listen_addr))?;
        if !listen.ip().is_unspecified() {
            return Ok(listen.to_string());
        }

        let announce = resolve_ipv4(&self.announce_addr)
            .with_context(|| format!("invalid announce address {}", self.announce_addr))?;
        match outbound(announce) {
            Some(ip) => Ok(SocketAddr::new(ip.into(), listen.port()).to_string()),
            None => bail!(
                "cannot determine a reachable address for {}; set --advertise-addr",
                self.data_listen_addr
            ),
        }
    }
}
