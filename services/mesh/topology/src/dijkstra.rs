//! Shortest path search.

use crate::error::GraphError;
use crate::graph::DirectedGraph;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

/// Node sequence from source to target with its total cost
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    /// Keys from source to target, both included; empty when source == target
    pub nodes: Vec<String>,
    /// Sum of edge costs
    pub cost: u64,
}

impl Path {
    /// Check if the path is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges on the path
    pub fn hop_count(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }
}

/// Single-pair shortest path strategy
pub trait PathSearcher<P> {
    /// Find the cheapest path from `source` to `target`.
    ///
    /// Returns an empty path when `source == target` and
    /// [`GraphError::NoPath`] when the target cannot be reached.
    fn shortest_path(
        &self,
        graph: &DirectedGraph<P>,
        source: &str,
        target: &str,
    ) -> Result<Path, GraphError>;
}

/// Dijkstra search with a binary heap; equal distances settle the lowest key first
#[derive(Debug, Clone, Copy, Default)]
pub struct DijkstraSearcher;

impl<P> PathSearcher<P> for DijkstraSearcher {
    fn shortest_path(
        &self,
        graph: &DirectedGraph<P>,
        source: &str,
        target: &str,
    ) -> Result<Path, GraphError> {
        shortest_path(graph, source, target)
    }
}

/// Find the cheapest path from `source` to `target` with Dijkstra
pub fn shortest_path<P>(
    graph: &DirectedGraph<P>,
    source: &str,
    target: &str,
) -> Result<Path, GraphError> {
    if source == target {
        return Ok(Path::default());
    }
    if !graph.contains(target) {
        return Err(GraphError::NodeNotFound(target.to_string()));
    }

    let tree = ShortestPathTree::build(graph, source, Some(target))?;
    tree.path_to(target).ok_or_else(|| GraphError::NoPath {
        from: source.to_string(),
        to: target.to_string(),
    })
}

/// Distances and predecessors from one source
#[derive(Debug, Clone)]
pub struct ShortestPathTree {
    source: String,
    distance: HashMap<String, u64>,
    predecessor: HashMap<String, String>,
}

impl ShortestPathTree {
    /// Run Dijkstra from `source`, stopping early once `stop_at` is settled
    pub fn build<P>(
        graph: &DirectedGraph<P>,
        source: &str,
        stop_at: Option<&str>,
    ) -> Result<Self, GraphError> {
        if !graph.contains(source) {
            return Err(GraphError::NodeNotFound(source.to_string()));
        }

        let mut distance: HashMap<String, u64> = HashMap::new();
        let mut predecessor: HashMap<String, String> = HashMap::new();
        let mut settled: BTreeSet<String> = BTreeSet::new();
        let mut pending: BinaryHeap<Reverse<(u64, String)>> = BinaryHeap::new();

        distance.insert(source.to_string(), 0);
        pending.push(Reverse((0, source.to_string())));

        while let Some(Reverse((current_dist, current))) = pending.pop() {
            // Skip entries superseded by a shorter distance
            if settled.contains(&current) {
                continue;
            }
            settled.insert(current.clone());

            if stop_at == Some(current.as_str()) {
                break;
            }

            for edge in graph.edges(&current)? {
                if settled.contains(&edge.destination) {
                    continue;
                }

                let candidate = current_dist.saturating_add(u64::from(edge.cost));
                let known = distance.get(&edge.destination).copied().unwrap_or(u64::MAX);
                if candidate < known {
                    distance.insert(edge.destination.clone(), candidate);
                    predecessor.insert(edge.destination.clone(), current.clone());
                    pending.push(Reverse((candidate, edge.destination.clone())));
                }
            }
        }

        Ok(Self {
            source: source.to_string(),
            distance,
            predecessor,
        })
    }

    /// Source key
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Shortest distance to a key, if reached
    pub fn distance(&self, key: &str) -> Option<u64> {
        self.distance.get(key).copied()
    }

    /// Keys reached from the source, excluding the source
    pub fn reached(&self) -> impl Iterator<Item = (&str, u64)> {
        self.distance
            .iter()
            .filter(move |(key, _)| key.as_str() != self.source)
            .map(|(key, dist)| (key.as_str(), *dist))
    }

    /// Reconstruct the path to a reached key
    pub fn path_to(&self, target: &str) -> Option<Path> {
        let cost = self.distance(target)?;
        if target == self.source {
            return Some(Path::default());
        }

        let mut nodes = vec![target.to_string()];
        let mut current = target;
        while let Some(previous) = self.predecessor.get(current) {
            nodes.push(previous.clone());
            current = previous;
        }
        nodes.reverse();

        Some(Path { nodes, cost })
    }
}
