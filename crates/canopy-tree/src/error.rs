//! Error types for tree configuration.

use thiserror::Error;

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors raised while loading or validating a tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Two nodes share a key
    #[error("Duplicate node key: {0}")]
    DuplicateKey(String),

    /// A static prerequisite names a node that does not exist
    #[error("Node {node} requires unknown node {prerequisite}")]
    MissingPrerequisite { node: String, prerequisite: String },

    /// The static prerequisite graph has a back edge
    #[error("Cycle detected in tree at node {0}")]
    CycleDetected(String),

    /// A field is empty or out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A prerequisite string could not be parsed
    #[error("Invalid prerequisite {0:?}: {1}")]
    InvalidPrerequisite(String, String),

    /// Unknown node size
    #[error("Invalid node size: {0}")]
    InvalidSize(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
