//! Read-only views for status displays.

use crate::error::{Error, Result};
use crate::model::{Node, Unlock, UnlockProgress, VotingSession};
use crate::service::ProgressionService;
use serde::{Deserialize, Serialize};

/// The node currently being accumulated toward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub node_key: String,
    pub display_name: String,
    pub target_level: u32,
    pub unlock_cost: u64,
    pub accumulated: u64,
    /// Whole percent, capped at 100
    pub percent: u8,
}

impl TargetSummary {
    fn new(node: &Node, target_level: u32, accumulated: u64) -> Self {
        let percent = if node.unlock_cost == 0 {
            100
        } else {
            (accumulated.saturating_mul(100) / node.unlock_cost).min(100) as u8
        };
        Self {
            node_key: node.key.clone(),
            display_name: node.display_name.clone(),
            target_level,
            unlock_cost: node.unlock_cost,
            accumulated,
            percent,
        }
    }
}

/// Overall progression state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionStatus {
    pub total_unlocked: usize,
    pub engagement_score: u64,
    pub active_session: Option<VotingSession>,
    pub progress: Option<UnlockProgress>,
    pub target: Option<TargetSummary>,
    pub all_unlocked: bool,
}

/// One node in the tree view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNodeView {
    pub node: Node,
    /// Highest unlocked level, 0 if locked
    pub unlocked_level: u32,
    pub prerequisites: Vec<String>,
    pub dependents: Vec<String>,
}

/// Everything known about a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDetails {
    pub node: Node,
    pub unlocked_level: u32,
    pub available: bool,
    pub next_level: Option<u32>,
    /// Locked prerequisites still blocking this node
    pub blocked_by: Vec<String>,
    pub dependents: Vec<String>,
    pub unlocks: Vec<Unlock>,
}

fn keys(nodes: Vec<&Node>) -> Vec<String> {
    nodes.into_iter().map(|n| n.key.clone()).collect()
}

impl ProgressionService {
    pub async fn get_progression_status(&self) -> Result<ProgressionStatus> {
        let snapshot = self.snapshot().await?;
        let progress = self.store().active_progress().await?;
        let target = progress.as_ref().and_then(|p| {
            let (node_id, level) = p.target()?;
            let node = snapshot.node(node_id)?;
            Some(TargetSummary::new(node, level, p.contributions_accumulated))
        });

        Ok(ProgressionStatus {
            total_unlocked: snapshot.unlocked_count(),
            engagement_score: self.store().engagement_score().await?,
            active_session: self.store().open_session().await?,
            all_unlocked: target.is_none() && snapshot.available().is_empty(),
            progress,
            target,
        })
    }

    /// Every node with its unlock level and edges, in tree order.
    pub async fn get_progression_tree(&self) -> Result<Vec<TreeNodeView>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .nodes()
            .iter()
            .map(|node| TreeNodeView {
                node: node.clone(),
                unlocked_level: snapshot.level(node.id),
                prerequisites: keys(snapshot.prerequisites(node.id)),
                dependents: keys(snapshot.dependents(node.id)),
            })
            .collect())
    }

    pub async fn get_node_details(&self, key: &str) -> Result<NodeDetails> {
        let snapshot = self.snapshot().await?;
        let node = snapshot
            .node_by_key(key)
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))?;
        let mut unlocks: Vec<Unlock> = self
            .store()
            .unlocks()
            .await?
            .into_iter()
            .filter(|u| u.node_id == node.id)
            .collect();
        unlocks.sort_by_key(|u| u.level);

        Ok(NodeDetails {
            node: node.clone(),
            unlocked_level: snapshot.level(node.id),
            available: snapshot.target_for(node.id).is_some(),
            next_level: snapshot.next_target_level(node),
            blocked_by: keys(snapshot.required_nodes(key)?),
            dependents: keys(snapshot.dependents(node.id)),
            unlocks,
        })
    }

    /// Every unlock record, oldest first.
    pub async fn get_unlocked_nodes(&self) -> Result<Vec<Unlock>> {
        let mut unlocks = self.store().unlocks().await?;
        unlocks.sort_by_key(|u| u.unlocked_at);
        Ok(unlocks)
    }
}
