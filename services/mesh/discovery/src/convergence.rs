//! Digest of neighbor table contents.

use mesh_wire::{AnnounceRecord, NodeIdentity};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// SHA-256 over a neighbor table snapshot.
///
/// Records are hashed in name order so the digest does not depend on table
/// iteration order. The stored sequence numbers of neighbors are left out:
/// otherwise two peers would advance each other's sequence number forever.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConvergenceHash([u8; 32]);

impl ConvergenceHash {
    /// Hash an ordered snapshot
    pub fn compute(snapshot: &BTreeMap<String, AnnounceRecord>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((snapshot.len() as u64).to_be_bytes());

        for (name, record) in snapshot {
            update_str(&mut hasher, name);
            update_identity(&mut hasher, &record.identity);
            hasher.update(record.cost.to_be_bytes());
            hasher.update((record.neighbors.len() as u64).to_be_bytes());
            for neighbor in &record.neighbors {
                update_identity(&mut hasher, neighbor);
            }
        }

        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn update_identity(hasher: &mut Sha256, identity: &NodeIdentity) {
    update_str(hasher, &identity.name);
    update_str(hasher, &identity.address);
}

impl fmt::Display for ConvergenceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ConvergenceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConvergenceHash({})", hex::encode(&self.0[..8]))
    }
}
