//! Build a topology graph from a discovery neighbor snapshot.
//!
//! Nodes are the local node, every neighbor in the snapshot, and every identity
//! those neighbors reported. Edges run from the local node to each neighbor
//! with the recorded link cost, and from each neighbor to each identity it
//! reported with [`DEFAULT_LINK_COST`]. Self-loops are never added.

use crate::error::GraphError;
use crate::graph::DirectedGraph;
use mesh_wire::{AnnounceRecord, NodeIdentity, DEFAULT_LINK_COST};
use std::collections::BTreeMap;

/// Derive a graph keyed by node name with identities as payload
pub fn derive_graph(
    local: &NodeIdentity,
    snapshot: &BTreeMap<String, AnnounceRecord>,
) -> Result<DirectedGraph<NodeIdentity>, GraphError> {
    let mut graph = DirectedGraph::new();
    ensure_node(&mut graph, local)?;

    for record in snapshot.values() {
        ensure_node(&mut graph, &record.identity)?;
        for reported in &record.neighbors {
            ensure_node(&mut graph, reported)?;
        }
    }

    for record in snapshot.values() {
        let neighbor = record.identity.name.as_str();
        if neighbor != local.name {
            graph.add_edge(&local.name, neighbor, record.cost)?;
        }

        for reported in &record.neighbors {
            if reported.name != neighbor {
                graph.add_edge(neighbor, &reported.name, DEFAULT_LINK_COST)?;
            }
        }
    }

    Ok(graph)
}

fn ensure_node(
    graph: &mut DirectedGraph<NodeIdentity>,
    identity: &NodeIdentity,
) -> Result<(), GraphError> {
    if graph.contains(&identity.name) {
        return Ok(());
    }
    graph.add_node(identity.name.clone(), identity.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dijkstra::shortest_path;

    fn id(name: &str) -> NodeIdentity {
        NodeIdentity::new(name, format!("{}.local:1146", name))
    }

    fn record(name: &str, cost: u32, reported: &[&str]) -> (String, AnnounceRecord) {
        (
            name.to_string(),
            AnnounceRecord {
                identity: id(name),
                sequence_number: 1,
                cost,
                neighbors: reported.iter().map(|n| id(n)).collect(),
            },
        )
    }

    #[test]
    fn test_empty_snapshot_is_local_only() {
        let graph = derive_graph(&id("me"), &BTreeMap::new()).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_two_hop_neighbors_become_reachable() {
        let snapshot: BTreeMap<_, _> = [
            record("a", 1, &["me", "far"]),
            record("b", 3, &["me"]),
        ]
        .into_iter()
        .collect();

        let graph = derive_graph(&id("me"), &snapshot).unwrap();

        assert_eq!(graph.keys().collect::<Vec<_>>(), vec!["a", "b", "far", "me"]);
        assert_eq!(graph.get_edge_cost("me", "a"), Ok(1));
        assert_eq!(graph.get_edge_cost("me", "b"), Ok(3));
        assert_eq!(graph.get_edge_cost("a", "far"), Ok(DEFAULT_LINK_COST));
        assert_eq!(graph.get_edge_cost("b", "me"), Ok(DEFAULT_LINK_COST));
        assert_eq!(graph.node("far").unwrap().payload, id("far"));

        let path = shortest_path(&graph, "me", "far").unwrap();
        assert_eq!(path.nodes, vec!["me", "a", "far"]);
    }

    #[test]
    fn test_own_record_adds_no_self_loop() {
        let snapshot: BTreeMap<_, _> = [record("me", 1, &["me"])].into_iter().collect();

        let graph = derive_graph(&id("me"), &snapshot).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }
}
