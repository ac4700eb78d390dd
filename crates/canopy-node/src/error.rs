//! Error types for the Canopy node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can stop the node.
#[derive(Debug, Error)]
pub enum Error {
    /// Tree config could not be loaded or validated
    #[error("Tree error: {0}")]
    Tree(#[from] canopy_tree::TreeError),

    /// Progression engine error
    #[error("Progression error: {0}")]
    Progression(#[from] canopy_progression::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
