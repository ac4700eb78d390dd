//! Persistent records of the progression engine.

use canopy_tree::{DynamicPrerequisite, ModifierConfig, NodeKind, NodeSize};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Store-assigned node identifier.
    NodeId
);
id_type!(
    /// Voting session identifier.
    SessionId
);
id_type!(
    /// Voting option identifier.
    OptionId
);
id_type!(
    /// Unlock progress row identifier.
    ProgressId
);

/// A node as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub key: String,
    pub display_name: String,
    pub description: String,
    pub kind: NodeKind,
    pub tier: u32,
    pub size: NodeSize,
    pub category: String,
    pub max_level: u32,
    /// Per-level cost, derived from tier and size
    pub unlock_cost: u64,
    pub sort_order: i32,
    /// Unlocked at level 1 by config sync and after resets
    pub auto_unlock: bool,
    pub dynamic_prerequisites: Vec<DynamicPrerequisite>,
    pub modifier: Option<ModifierConfig>,
    pub created_at: DateTime<Utc>,
}

/// Node fields written by config sync.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub key: String,
    pub display_name: String,
    pub description: String,
    pub kind: NodeKind,
    pub tier: u32,
    pub size: NodeSize,
    pub category: String,
    pub max_level: u32,
    pub unlock_cost: u64,
    pub sort_order: i32,
    pub auto_unlock: bool,
    pub dynamic_prerequisites: Vec<DynamicPrerequisite>,
    pub modifier: Option<ModifierConfig>,
}

impl NewNode {
    /// Whether an existing node already carries these fields.
    pub fn matches(&self, node: &Node) -> bool {
        self.key == node.key
            && self.display_name == node.display_name
            && self.description == node.description
            && self.kind == node.kind
            && self.tier == node.tier
            && self.size == node.size
            && self.category == node.category
            && self.max_level == node.max_level
            && self.unlock_cost == node.unlock_cost
            && self.sort_order == node.sort_order
            && self.auto_unlock == node.auto_unlock
            && self.dynamic_prerequisites == node.dynamic_prerequisites
            && self.modifier == node.modifier
    }
}

/// Who or what caused an unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockSource {
    Vote,
    Admin,
    Auto,
    InstantOverride,
}

impl fmt::Display for UnlockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnlockSource::Vote => "vote",
            UnlockSource::Admin => "admin",
            UnlockSource::Auto => "auto",
            UnlockSource::InstantOverride => "instant_override",
        };
        f.write_str(s)
    }
}

/// One unlocked (node, level) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unlock {
    pub node_id: NodeId,
    pub level: u32,
    pub unlocked_by: UnlockSource,
    /// Contributions accumulated when the unlock happened
    pub contribution_score: u64,
    pub unlocked_at: DateTime<Utc>,
}

/// The accumulation counter. Exactly one row has `unlocked_at == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockProgress {
    pub id: ProgressId,
    pub node_id: Option<NodeId>,
    pub target_level: Option<u32>,
    pub contributions_accumulated: u64,
    /// Session that selected the target
    pub voting_session_id: Option<SessionId>,
    pub started_at: DateTime<Utc>,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl UnlockProgress {
    /// The (node, level) being accumulated toward, if decided.
    pub fn target(&self) -> Option<(NodeId, u32)> {
        Some((self.node_id?, self.target_level?))
    }

    pub fn is_active(&self) -> bool {
        self.unlocked_at.is_none()
    }
}

/// Voting session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Voting,
    Frozen,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Voting => "voting",
            SessionStatus::Frozen => "frozen",
            SessionStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A candidate in a voting session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingOption {
    pub id: OptionId,
    pub node_id: NodeId,
    pub target_level: u32,
    pub vote_count: u32,
    /// When this option reached its current vote count
    pub last_highest_vote_at: Option<DateTime<Utc>>,
    /// Node snapshot resolved at read time
    pub node: Node,
}

/// A voting session with its options in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: SessionId,
    pub status: SessionStatus,
    pub options: Vec<VotingOption>,
    pub winning_option_id: Option<OptionId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl VotingSession {
    pub fn option(&self, id: OptionId) -> Option<&VotingOption> {
        self.options.iter().find(|o| o.id == id)
    }

    pub fn winning_option(&self) -> Option<&VotingOption> {
        self.winning_option_id.and_then(|id| self.option(id))
    }

    pub fn option_for_node(&self, node_id: NodeId) -> Option<&VotingOption> {
        self.options.iter().find(|o| o.node_id == node_id)
    }

    /// Voting or frozen.
    pub fn is_open(&self) -> bool {
        self.status != SessionStatus::Completed
    }
}

/// One engagement event and the contribution points it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetric {
    pub user_id: String,
    pub metric_type: String,
    pub value: u64,
    pub points: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Engagement totals for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserEngagement {
    pub user_id: String,
    /// Raw metric values summed by metric type
    pub by_metric: BTreeMap<String, u64>,
    pub total_points: u64,
}

/// Leaderboard entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorScore {
    pub user_id: String,
    pub points: u64,
}

/// Contribution points per calendar day (UTC).
pub type DailyTotals = BTreeMap<NaiveDate, u64>;

/// Last applied tree config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub config_name: String,
    pub fingerprint: String,
    pub node_count: usize,
    pub synced_at: DateTime<Utc>,
}

/// Audit entry for a full tree reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRecord {
    pub reset_by: String,
    pub reason: String,
    pub nodes_reset: usize,
    pub engagement_score_at_reset: u64,
    pub reset_at: DateTime<Utc>,
}
