//! Discovery message structures for the wire protocol.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default link cost for a directly heard neighbor (one hop)
pub const DEFAULT_LINK_COST: u32 = 1;

/// Name and reachable address of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Unique node name
    pub name: String,
    /// Announce/data endpoint (host:port)
    pub address: String,
}

impl NodeIdentity {
    /// Create a new node identity
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// Basic packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Strictly increasing per originating node
    pub sequence_number: u64,
}

impl PacketHeader {
    /// Create a new packet header
    pub fn new(sequence_number: u64) -> Self {
        Self { sequence_number }
    }
}

/// Last known announce data for one neighbor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceRecord {
    /// Identity of the neighbor
    pub identity: NodeIdentity,
    /// Sequence number of the announce this record came from
    pub sequence_number: u64,
    /// Cost of the link to this neighbor
    pub cost: u32,
    /// Identities the neighbor reported in its own snapshot, sorted by name
    pub neighbors: Vec<NodeIdentity>,
}

impl AnnounceRecord {
    /// Build the record a receiver stores for an announce packet
    pub fn from_packet(packet: &AnnouncePacket, cost: u32) -> Self {
        Self {
            identity: packet.identity.clone(),
            sequence_number: packet.header.sequence_number,
            cost,
            neighbors: packet
                .neighbors
                .values()
                .map(|record| record.identity.clone())
                .collect(),
        }
    }
}

/// One neighbor as carried in an announce.
///
/// Only the neighbor itself is sent, not the neighbors it reported in turn, so
/// an announce grows linearly with the sender's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedNeighbor {
    /// Identity of the neighbor
    pub identity: NodeIdentity,
    /// Sequence number the sender last accepted from this neighbor
    pub sequence_number: u64,
    /// Sender's link cost to this neighbor
    pub cost: u32,
}

impl From<&AnnounceRecord> for ReportedNeighbor {
    fn from(record: &AnnounceRecord) -> Self {
        Self {
            identity: record.identity.clone(),
            sequence_number: record.sequence_number,
            cost: record.cost,
        }
    }
}

/// Announce packet broadcast periodically by every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncePacket {
    /// Sequence header of the originator
    pub header: PacketHeader,
    /// Originator identity
    pub identity: NodeIdentity,
    /// Originator's neighbors, keyed by node name
    pub neighbors: BTreeMap<String, ReportedNeighbor>,
}

impl AnnouncePacket {
    /// Create a new announce packet
    pub fn new(
        sequence_number: u64,
        identity: NodeIdentity,
        neighbors: BTreeMap<String, ReportedNeighbor>,
    ) -> Self {
        Self {
            header: PacketHeader::new(sequence_number),
            identity,
            neighbors,
        }
    }

    /// Build an announce from a neighbor table snapshot
    pub fn from_snapshot(
        sequence_number: u64,
        identity: NodeIdentity,
        snapshot: &BTreeMap<String, AnnounceRecord>,
    ) -> Self {
        let neighbors = snapshot
            .iter()
            .map(|(name, record)| (name.clone(), ReportedNeighbor::from(record)))
            .collect();
        Self::new(sequence_number, identity, neighbors)
    }

    /// Sequence number of this announce
    pub fn sequence_number(&self) -> u64 {
        self.header.sequence_number
    }

    /// Check if this announce is strictly newer than a stored sequence number
    pub fn is_newer_than(&self, other_seq: u64) -> bool {
        self.header.sequence_number > other_seq
    }
}

/// Application payload exchanged on the data endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Name of the sending node
    pub source: String,
    /// Sender-local sequence number
    pub sequence_number: u64,
    /// Opaque application bytes
    pub payload: Bytes,
}

impl DataMessage {
    /// Create a new data message
    pub fn new(source: impl Into<String>, sequence_number: u64, payload: Bytes) -> Self {
        Self {
            source: source.into(),
            sequence_number,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, seq: u64) -> AnnounceRecord {
        AnnounceRecord {
            identity: NodeIdentity::new(name, format!("10.0.0.1:{}", 1000 + seq)),
            sequence_number: seq,
            cost: DEFAULT_LINK_COST,
            neighbors: vec![NodeIdentity::new("far", "10.0.0.7:1146")],
        }
    }

    #[test]
    fn test_sequence_number_comparison() {
        let packet = AnnouncePacket::new(5, NodeIdentity::new("n1", "10.0.0.1:1145"), BTreeMap::new());

        assert!(packet.is_newer_than(4));
        assert!(!packet.is_newer_than(5));
        assert!(!packet.is_newer_than(6));
    }

    #[test]
    fn test_record_from_packet_lists_reported_identities() {
        let mut neighbors = BTreeMap::new();
        neighbors.insert("b".to_string(), record("b", 2));
        neighbors.insert("a".to_string(), record("a", 1));

        let packet =
            AnnouncePacket::from_snapshot(7, NodeIdentity::new("origin", "10.0.0.9:1145"), &neighbors);
        assert_eq!(packet.neighbors["a"].sequence_number, 1);
        assert_eq!(packet.neighbors["b"].identity, neighbors["b"].identity);
        let stored = AnnounceRecord::from_packet(&packet, 3);

        assert_eq!(stored.identity.name, "origin");
        assert_eq!(stored.sequence_number, 7);
        assert_eq!(stored.cost, 3);
        let names: Vec<&str> = stored.neighbors.iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_identity_display() {
        let id = NodeIdentity::new("node-a", "127.0.0.1:1145");
        assert_eq!(id.to_string(), "node-a@127.0.0.1:1145");
    }
}
