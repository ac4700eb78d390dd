//! Error types for the progression engine.

use crate::model::ProgressId;
use std::time::Duration;
use thiserror::Error;

/// Result type for progression operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned synchronously to callers.
#[derive(Debug, Error)]
pub enum Error {
    /// No node with this key
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Requested level is above the node's max level
    #[error("Level {level} exceeds max level {max_level} for node {key}")]
    MaxLevelExceeded { key: String, level: u32, max_level: u32 },

    /// Levels start at 1
    #[error("Invalid level {level} for node {key}")]
    InvalidLevel { key: String, level: u32 },

    /// No voting session is in the required state
    #[error("No active voting session")]
    NoActiveSession,

    /// A voting or frozen session already exists
    #[error("A voting session is already active")]
    SessionAlreadyActive,

    /// The session is already frozen
    #[error("Voting session is already frozen")]
    SessionAlreadyFrozen,

    /// Nothing left to target
    #[error("No nodes available to unlock")]
    NoNodesAvailable,

    /// Repeat vote in the same session
    #[error("User has already voted in this session")]
    UserAlreadyVoted,

    /// Vote index outside 1..=options
    #[error("Invalid option {index}: session has {count} options")]
    InvalidOption { index: usize, count: usize },

    /// Identity resolution or registration failed
    #[error("Identity error: {0}")]
    Identity(String),

    /// Contribution aimed at a progress row that has already completed
    #[error("Progress {0} is no longer active")]
    StaleProgress(ProgressId),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Store(String),

    /// Tree config failed to load or validate
    #[error("Tree error: {0}")]
    Tree(#[from] canopy_tree::TreeError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background work outlived the shutdown deadline
    #[error("Shutdown timed out after {0:?} waiting for background tasks")]
    ShutdownTimeout(Duration),
}
