//! Route table computation.

use crate::dijkstra::ShortestPathTree;
use crate::error::GraphError;
use crate::graph::DirectedGraph;
use std::collections::BTreeMap;
use tracing::debug;

/// Computed route information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedRoute {
    /// Destination node
    pub destination: String,
    /// First node after the source on the shortest path
    pub next_hop: String,
    /// Total cost to reach destination
    pub total_cost: u64,
    /// Number of hops to destination
    pub hop_count: usize,
}

/// Shortest routes from `source` to every reachable node, keyed by destination
pub fn compute_routes<P>(
    graph: &DirectedGraph<P>,
    source: &str,
) -> Result<BTreeMap<String, ComputedRoute>, GraphError> {
    let tree = ShortestPathTree::build(graph, source, None)?;

    let mut routes = BTreeMap::new();
    for (destination, _) in tree.reached() {
        let Some(path) = tree.path_to(destination) else {
            continue;
        };
        // nodes[0] is the source
        let Some(next_hop) = path.nodes.get(1) else {
            continue;
        };

        routes.insert(
            destination.to_string(),
            ComputedRoute {
                destination: destination.to_string(),
                next_hop: next_hop.clone(),
                total_cost: path.cost,
                hop_count: path.hop_count(),
            },
        );
    }

    debug!("Computed {} routes from node {}", routes.len(), source);
    Ok(routes)
}
