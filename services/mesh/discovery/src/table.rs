//! Neighbor table shared between the announce daemon's tasks.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mesh_wire::AnnounceRecord;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of offering a record to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First record for this name
    Inserted,
    /// Record carried a strictly greater sequence number and replaced the stored one
    Replaced,
    /// Sequence number was not newer; record unchanged, liveness refreshed
    Stale,
}

impl Observation {
    /// Whether the table changed
    pub fn is_change(self) -> bool {
        !matches!(self, Observation::Stale)
    }
}

#[derive(Debug, Clone)]
struct NeighborEntry {
    record: AnnounceRecord,
    last_seen: Instant,
}

/// Concurrent mapping node name -> last known announce record
#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: DashMap<String, NeighborEntry>,
}

impl NeighborTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for its node name.
    ///
    /// An unknown name is inserted exactly once even under concurrent arrivals.
    /// A known name is replaced only by a strictly greater sequence number; any
    /// other announce from it still counts as proof of life for expiry.
    pub fn observe(&self, record: AnnounceRecord) -> Observation {
        let name = record.identity.name.clone();
        let seq = record.sequence_number;

        match self.entries.entry(name) {
            Entry::Vacant(vacant) => {
                vacant.insert(NeighborEntry {
                    record,
                    last_seen: Instant::now(),
                });
                Observation::Inserted
            }
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get().record.sequence_number;
                if seq > stored {
                    occupied.insert(NeighborEntry {
                        record,
                        last_seen: Instant::now(),
                    });
                    Observation::Replaced
                } else {
                    occupied.get_mut().last_seen = Instant::now();
                    if seq < stored {
                        debug!(node = %occupied.key(), seq, stored, "Dropping stale announce");
                    }
                    Observation::Stale
                }
            }
        }
    }

    /// Record for a node name
    pub fn get(&self, name: &str) -> Option<AnnounceRecord> {
        self.entries.get(name).map(|entry| entry.record.clone())
    }

    /// Check if a node name is known
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of known neighbors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no neighbor is known
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the table ordered by node name
    pub fn snapshot(&self) -> BTreeMap<String, AnnounceRecord> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().record.clone()))
            .collect()
    }

    /// Remove entries not refreshed within `ttl`, returning the removed names
    pub fn expire(&self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_seen) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for name in stale {
            // Re-check under the shard lock; a fresh announce may have arrived.
            if self
                .entries
                .remove_if(&name, |_, entry| now.duration_since(entry.last_seen) > ttl)
                .is_some()
            {
                removed.push(name);
            }
        }
        removed
    }
}
