//! Graph error types.

use thiserror::Error;

/// Topology graph errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A node with this key is already present
    #[error("node {0} already exists")]
    AlreadyExists(String),

    /// No node with this key
    #[error("node {0} not found")]
    NodeNotFound(String),

    /// No edge between the two nodes
    #[error("edge {start} -> {end} not found")]
    EdgeNotFound {
        /// Start key
        start: String,
        /// End key
        end: String,
    },

    /// Target is not reachable from source
    #[error("no path from {from} to {to}")]
    NoPath {
        /// Source key
        from: String,
        /// Target key
        to: String,
    },
}

impl GraphError {
    /// Whether the error names a missing node or edge
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NodeNotFound(_) | GraphError::EdgeNotFound { .. })
    }
}
