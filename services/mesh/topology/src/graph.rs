//! Directed weighted graph keyed by node name.

use crate::error::GraphError;
use std::collections::BTreeMap;

/// Graph node with an opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<P> {
    /// Unique key
    pub key: String,
    /// Caller data
    pub payload: P,
}

/// Outgoing edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectedEdge {
    /// Key of the node this edge points to
    pub destination: String,
    /// Non-negative edge cost
    pub cost: u32,
}

#[derive(Debug, Clone)]
struct Adjacency<P> {
    node: Node<P>,
    edges: Vec<DirectedEdge>,
}

/// Directed graph with ordered adjacency lists.
///
/// Every edge destination refers to a node in the graph. Parallel edges
/// between the same ordered pair are kept as separate entries.
#[derive(Debug, Clone)]
pub struct DirectedGraph<P> {
    adjacency: BTreeMap<String, Adjacency<P>>,
}

impl<P> Default for DirectedGraph<P> {
    fn default() -> Self {
        Self {
            adjacency: BTreeMap::new(),
        }
    }
}

impl<P> DirectedGraph<P> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; fails if the key is present
    pub fn add_node(&mut self, key: impl Into<String>, payload: P) -> Result<(), GraphError> {
        let key = key.into();
        if self.adjacency.contains_key(&key) {
            return Err(GraphError::AlreadyExists(key));
        }

        self.adjacency.insert(
            key.clone(),
            Adjacency {
                node: Node { key, payload },
                edges: Vec::new(),
            },
        );
        Ok(())
    }

    /// Remove a node and every edge pointing to it
    pub fn remove_node(&mut self, key: &str) -> Result<Node<P>, GraphError> {
        let removed = self
            .adjacency
            .remove(key)
            .ok_or_else(|| GraphError::NodeNotFound(key.to_string()))?;

        for adjacency in self.adjacency.values_mut() {
            adjacency.edges.retain(|edge| edge.destination != key);
        }

        Ok(removed.node)
    }

    /// Append an edge; fails if either endpoint is absent
    pub fn add_edge(&mut self, start: &str, end: &str, cost: u32) -> Result<(), GraphError> {
        if !self.adjacency.contains_key(end) {
            return Err(GraphError::NodeNotFound(end.to_string()));
        }
        let adjacency = self
            .adjacency
            .get_mut(start)
            .ok_or_else(|| GraphError::NodeNotFound(start.to_string()))?;

        adjacency.edges.push(DirectedEdge {
            destination: end.to_string(),
            cost,
        });
        Ok(())
    }

    /// Remove the first edge from `start` to `end`
    pub fn remove_edge(&mut self, start: &str, end: &str) -> Result<DirectedEdge, GraphError> {
        let adjacency = self
            .adjacency
            .get_mut(start)
            .ok_or_else(|| GraphError::NodeNotFound(start.to_string()))?;

        let position = adjacency
            .edges
            .iter()
            .position(|edge| edge.destination == end)
            .ok_or_else(|| GraphError::EdgeNotFound {
                start: start.to_string(),
                end: end.to_string(),
            })?;

        Ok(adjacency.edges.remove(position))
    }

    /// Cost of the first edge from `start` to `end`
    pub fn get_edge_cost(&self, start: &str, end: &str) -> Result<u32, GraphError> {
        self.edges(start)?
            .iter()
            .find(|edge| edge.destination == end)
            .map(|edge| edge.cost)
            .ok_or_else(|| GraphError::EdgeNotFound {
                start: start.to_string(),
                end: end.to_string(),
            })
    }

    /// Outgoing edges of a node, in insertion order
    pub fn edges(&self, key: &str) -> Result<&[DirectedEdge], GraphError> {
        self.adjacency
            .get(key)
            .map(|adjacency| adjacency.edges.as_slice())
            .ok_or_else(|| GraphError::NodeNotFound(key.to_string()))
    }

    /// Node for a key
    pub fn node(&self, key: &str) -> Option<&Node<P>> {
        self.adjacency.get(key).map(|adjacency| &adjacency.node)
    }

    /// Check if a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.adjacency.contains_key(key)
    }

    /// Node keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of edges, parallel edges counted separately
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|adjacency| adjacency.edges.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(keys: &[&str]) -> DirectedGraph<()> {
        let mut graph = DirectedGraph::new();
        for key in keys {
            graph.add_node(*key, ()).unwrap();
        }
        graph
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = graph(&["n1"]);
        assert_eq!(
            graph.add_node("n1", ()),
            Err(GraphError::AlreadyExists("n1".to_string()))
        );
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_add_edge_requires_both_endpoints() {
        let mut graph = graph(&["n1"]);

        assert_eq!(
            graph.add_edge("n1", "n2", 1),
            Err(GraphError::NodeNotFound("n2".to_string()))
        );
        assert_eq!(
            graph.add_edge("n2", "n1", 1),
            Err(GraphError::NodeNotFound("n2".to_string()))
        );
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_remove_node_strips_incoming_edges() {
        let mut graph = graph(&["n1", "n2", "n3"]);
        graph.add_edge("n1", "n2", 1).unwrap();
        graph.add_edge("n1", "n2", 4).unwrap();
        graph.add_edge("n3", "n2", 2).unwrap();
        graph.add_edge("n1", "n3", 3).unwrap();
        graph.add_edge("n2", "n3", 5).unwrap();

        let removed = graph.remove_node("n2").unwrap();
        assert_eq!(removed.key, "n2");

        assert!(!graph.contains("n2"));
        assert!(graph.get_edge_cost("n1", "n2").unwrap_err().is_not_found());
        assert!(graph.get_edge_cost("n3", "n2").unwrap_err().is_not_found());
        assert!(graph.get_edge_cost("n2", "n3").unwrap_err().is_not_found());
        assert_eq!(graph.get_edge_cost("n1", "n3"), Ok(3));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_remove_missing_node() {
        let mut graph = graph(&["n1"]);
        assert_eq!(
            graph.remove_node("n9").unwrap_err(),
            GraphError::NodeNotFound("n9".to_string())
        );
    }

    #[test]
    fn test_parallel_edges_kept_in_order() {
        let mut graph = graph(&["n4", "n5"]);
        graph.add_edge("n4", "n5", 10).unwrap();
        graph.add_edge("n4", "n5", 1).unwrap();

        assert_eq!(graph.edges("n4").unwrap().len(), 2);
        assert_eq!(graph.get_edge_cost("n4", "n5"), Ok(10));

        let removed = graph.remove_edge("n4", "n5").unwrap();
        assert_eq!(removed.cost, 10);
        assert_eq!(graph.get_edge_cost("n4", "n5"), Ok(1));
    }

    #[test]
    fn test_remove_edge_absent_is_not_found() {
        let mut graph = graph(&["n1", "n2"]);

        assert_eq!(
            graph.remove_edge("n1", "n2"),
            Err(GraphError::EdgeNotFound {
                start: "n1".to_string(),
                end: "n2".to_string(),
            })
        );
        assert_eq!(
            graph.remove_edge("n7", "n2"),
            Err(GraphError::NodeNotFound("n7".to_string()))
        );
    }

    #[test]
    fn test_keys_sorted_and_payload_kept() {
        let mut graph = DirectedGraph::new();
        graph.add_node("b", 2).unwrap();
        graph.add_node("a", 1).unwrap();

        assert_eq!(graph.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(graph.node("b").map(|n| n.payload), Some(2));
    }
}
