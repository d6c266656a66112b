//! Directed topology graph, shortest paths, and route derivation for mesh.
//!
//! This crate provides the graph that discovered neighbors are projected onto,
//! a Dijkstra search over it, and per-destination route computation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod derive;
pub mod dijkstra;
pub mod error;
pub mod graph;
pub mod routes;

// Re-export main types
pub use derive::derive_graph;
pub use dijkstra::{shortest_path, DijkstraSearcher, Path, PathSearcher, ShortestPathTree};
pub use error::GraphError;
pub use graph::{DirectedEdge, DirectedGraph, Node};
pub use routes::{compute_routes, ComputedRoute};
