//! Store boundary.
//!
//! Every capability the engine needs is a required method; there are no
//! optional extensions to probe for at runtime. Implementations must provide
//! atomic counter increments, referential integrity between progress, session
//! and node, and must combine the vote-uniqueness check with the vote
//! increment (see [`ProgressionStore::record_vote`]).

use crate::error::Result;
use crate::model::{
    ContributorScore, DailyTotals, EngagementMetric, NewNode, Node, NodeId, OptionId,
    ProgressId, ResetRecord, SessionId, SessionStatus, SyncMetadata, Unlock, UnlockProgress,
    UnlockSource, UserEngagement, VotingSession,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Persistence for nodes, unlocks, voting, progress and engagement.
#[async_trait]
pub trait ProgressionStore: Send + Sync {
    // --- Nodes ---

    async fn node(&self, id: NodeId) -> Result<Option<Node>>;

    async fn node_by_key(&self, key: &str) -> Result<Option<Node>>;

    async fn nodes(&self) -> Result<Vec<Node>>;

    async fn insert_node(&self, node: NewNode) -> Result<NodeId>;

    async fn update_node(&self, id: NodeId, node: NewNode) -> Result<()>;

    /// Replace the static prerequisites of a node.
    async fn set_prerequisites(&self, id: NodeId, prerequisites: Vec<NodeId>) -> Result<()>;

    /// Static prerequisites of a node.
    async fn prerequisites(&self, id: NodeId) -> Result<Vec<Node>>;

    /// Nodes that list `id` as a static prerequisite.
    async fn dependents(&self, id: NodeId) -> Result<Vec<Node>>;

    /// Every static edge as `(node, required)`.
    async fn prerequisite_edges(&self) -> Result<Vec<(NodeId, NodeId)>>;

    // --- Unlocks ---

    async fn unlocks(&self) -> Result<Vec<Unlock>>;

    async fn unlock(&self, id: NodeId, level: u32) -> Result<Option<Unlock>>;

    /// Record an unlock. An existing record for the same level is kept.
    async fn unlock_node(
        &self,
        id: NodeId,
        level: u32,
        source: UnlockSource,
        contribution_score: u64,
    ) -> Result<Unlock>;

    /// Remove an unlock. Returns whether a record existed.
    async fn relock_node(&self, id: NodeId, level: u32) -> Result<bool>;

    // --- Voting ---

    /// Create a session in `voting` status.
    async fn create_session(&self) -> Result<SessionId>;

    async fn add_option(&self, session: SessionId, node: NodeId, target_level: u32)
        -> Result<OptionId>;

    async fn session(&self, id: SessionId) -> Result<Option<VotingSession>>;

    /// The latest session in `voting` or `frozen` status.
    async fn open_session(&self) -> Result<Option<VotingSession>>;

    /// The latest session in any status.
    async fn latest_session(&self) -> Result<Option<VotingSession>>;

    /// Atomically reject a repeat voter, increment the option and record the vote.
    ///
    /// Fails with `UserAlreadyVoted` on a repeat and `NoActiveSession` when the
    /// session is not in `voting` status.
    async fn record_vote(&self, user_id: &str, session: SessionId, option: OptionId)
        -> Result<()>;

    async fn set_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()>;

    /// Complete a session, recording the winner if any.
    async fn end_session(&self, id: SessionId, winner: Option<OptionId>) -> Result<()>;

    // --- Progress ---

    async fn create_progress(&self) -> Result<UnlockProgress>;

    async fn active_progress(&self) -> Result<Option<UnlockProgress>>;

    /// Atomic increment of the accumulated total.
    /// Atomically add to an active row. A completed row is rejected with
    /// [`Error::StaleProgress`](crate::Error::StaleProgress).
    async fn add_contribution(&self, id: ProgressId, amount: u64) -> Result<()>;

    async fn set_progress_target(
        &self,
        id: ProgressId,
        node: NodeId,
        target_level: u32,
        session: SessionId,
    ) -> Result<()>;

    /// Close the progress row and open its successor seeded with `rollover`.
    async fn complete_progress(&self, id: ProgressId, rollover: u64) -> Result<ProgressId>;

    /// Drop the target of any active progress aimed at `node`.
    async fn clear_progress_target(&self, node: NodeId) -> Result<()>;

    // --- Engagement ---

    async fn record_engagement(&self, metric: EngagementMetric) -> Result<()>;

    /// Configured weight per metric type.
    async fn engagement_weights(&self) -> Result<HashMap<String, f64>>;

    /// Total contribution points ever recorded.
    async fn engagement_score(&self) -> Result<u64>;

    async fn user_engagement(&self, user_id: &str) -> Result<UserEngagement>;

    async fn contribution_leaderboard(&self, limit: usize) -> Result<Vec<ContributorScore>>;

    async fn daily_contributions(&self, since: DateTime<Utc>) -> Result<DailyTotals>;

    // --- Sync & reset ---

    async fn sync_metadata(&self, config_name: &str) -> Result<Option<SyncMetadata>>;

    async fn put_sync_metadata(&self, metadata: SyncMetadata) -> Result<()>;

    /// Clear unlocks, sessions, votes and progress in one step.
    ///
    /// Engagement history survives only if `preserve_user_data` is set.
    /// Returns the number of unlock records removed.
    async fn reset_tree(&self, record: ResetRecord, preserve_user_data: bool) -> Result<usize>;
}
