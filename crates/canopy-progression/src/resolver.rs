//! Prerequisite resolution.
//!
//! Availability is computed over a [`TreeSnapshot`]: every node, every static
//! edge and every unlock, read once from the store. A node is available when
//! it still has a level left to unlock, every static prerequisite is at level
//! 1 or higher, and every dynamic condition holds against the live unlock
//! counts.

use crate::error::{Error, Result};
use crate::model::{Node, NodeId, Unlock};
use crate::service::ProgressionService;
use crate::store::ProgressionStore;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Point-in-time view of the tree and its unlock state.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    /// node → required nodes
    requires: HashMap<NodeId, Vec<NodeId>>,
    /// node → unlocked levels
    levels: HashMap<NodeId, BTreeSet<u32>>,
}

impl TreeSnapshot {
    /// Read the whole tree from the store.
    pub async fn load(store: &dyn ProgressionStore) -> Result<Self> {
        let nodes = store.nodes().await?;
        let edges = store.prerequisite_edges().await?;
        let unlocks = store.unlocks().await?;
        Ok(Self::from_parts(nodes, edges, &unlocks))
    }

    pub fn from_parts(nodes: Vec<Node>, edges: Vec<(NodeId, NodeId)>, unlocks: &[Unlock]) -> Self {
        let index = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        let mut requires: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (node, required) in edges {
            requires.entry(node).or_default().push(required);
        }
        let mut levels: HashMap<NodeId, BTreeSet<u32>> = HashMap::new();
        for u in unlocks {
            levels.entry(u.node_id).or_default().insert(u.level);
        }
        Self {
            nodes,
            index,
            requires,
            levels,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn node_by_key(&self, key: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.key == key)
    }

    /// Highest unlocked level (0 when locked).
    pub fn level(&self, id: NodeId) -> u32 {
        self.levels
            .get(&id)
            .and_then(|l| l.iter().next_back().copied())
            .unwrap_or(0)
    }

    pub fn is_unlocked(&self, id: NodeId) -> bool {
        self.level(id) >= 1
    }

    /// Whether a specific level has an unlock record.
    pub fn has_level(&self, id: NodeId, level: u32) -> bool {
        self.levels.get(&id).is_some_and(|l| l.contains(&level))
    }

    /// Lowest level without an unlock record, or None when fully unlocked.
    pub fn next_target_level(&self, node: &Node) -> Option<u32> {
        (1..=node.max_level).find(|&level| !self.has_level(node.id, level))
    }

    /// Static prerequisites of a node.
    pub fn prerequisites(&self, id: NodeId) -> Vec<&Node> {
        self.requires
            .get(&id)
            .map(|reqs| reqs.iter().filter_map(|r| self.node(*r)).collect())
            .unwrap_or_default()
    }

    /// Nodes listing `id` as a static prerequisite.
    pub fn dependents(&self, id: NodeId) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| self.requires.get(&n.id).is_some_and(|r| r.contains(&id)))
            .collect()
    }

    /// Number of distinct unlocked nodes.
    pub fn unlocked_count(&self) -> usize {
        self.nodes.iter().filter(|n| self.is_unlocked(n.id)).count()
    }

    /// Tiers of unlocked nodes, counting `assume` as unlocked.
    fn unlocked_tiers(&self, assume: Option<NodeId>) -> Vec<u32> {
        self.nodes
            .iter()
            .filter(|n| self.is_unlocked(n.id) || Some(n.id) == assume)
            .map(|n| n.tier)
            .collect()
    }

    fn is_available(&self, node: &Node, assume: Option<NodeId>, tiers: &[u32]) -> bool {
        if self.next_target_level(node).is_none() {
            return false;
        }
        let statics_met = self
            .requires
            .get(&node.id)
            .map(|reqs| {
                reqs.iter()
                    .all(|r| self.is_unlocked(*r) || Some(*r) == assume)
            })
            .unwrap_or(true);
        statics_met && node.dynamic_prerequisites.iter().all(|d| d.is_met(tiers))
    }

    /// Nodes that can be targeted right now.
    pub fn available(&self) -> Vec<&Node> {
        let tiers = self.unlocked_tiers(None);
        self.nodes
            .iter()
            .filter(|n| self.is_available(n, None, &tiers))
            .collect()
    }

    /// A node's next level, if the node is available now.
    pub fn target_for(&self, id: NodeId) -> Option<(&Node, u32)> {
        let node = self.node(id)?;
        let tiers = self.unlocked_tiers(None);
        if !self.is_available(node, None, &tiers) {
            return None;
        }
        Some((node, self.next_target_level(node)?))
    }

    /// Available nodes plus those that become available once `target` unlocks.
    pub fn available_with_future_target(&self, target: Option<NodeId>) -> Vec<&Node> {
        let Some(target) = target else {
            return self.available();
        };
        let now = self.unlocked_tiers(None);
        let then = self.unlocked_tiers(Some(target));
        self.nodes
            .iter()
            .filter(|n| {
                self.is_available(n, None, &now)
                    || (n.id != target && self.is_available(n, Some(target), &then))
            })
            .collect()
    }

    /// Locked prerequisites blocking `key`, transitively, each listed once.
    ///
    /// Only locked prerequisites are followed: an unlocked prerequisite ends
    /// its branch.
    pub fn required_nodes(&self, key: &str) -> Result<Vec<&Node>> {
        let node = self
            .node_by_key(key)
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))?;

        let mut visited = HashSet::new();
        let mut required = Vec::new();
        self.collect_required(node.id, &mut visited, &mut required);
        Ok(required)
    }

    fn collect_required<'a>(
        &'a self,
        id: NodeId,
        visited: &mut HashSet<NodeId>,
        out: &mut Vec<&'a Node>,
    ) {
        for prereq in self.prerequisites(id) {
            if self.is_unlocked(prereq.id) || !visited.insert(prereq.id) {
                continue;
            }
            out.push(prereq);
            self.collect_required(prereq.id, visited, out);
        }
    }
}

impl ProgressionService {
    pub(crate) async fn snapshot(&self) -> Result<TreeSnapshot> {
        TreeSnapshot::load(self.store()).await
    }

    /// Nodes that can be voted on or targeted now.
    pub async fn get_available_unlocks(&self) -> Result<Vec<Node>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.available().into_iter().cloned().collect())
    }

    /// Available nodes plus those unblocked by the current target.
    pub async fn get_available_unlocks_with_future_target(&self) -> Result<Vec<Node>> {
        let target = self
            .store()
            .active_progress()
            .await?
            .and_then(|p| p.node_id);
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .available_with_future_target(target)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Locked prerequisites standing between a node and availability.
    pub async fn get_required_nodes(&self, key: &str) -> Result<Vec<Node>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.required_nodes(key)?.into_iter().cloned().collect())
    }

    /// Lowest level of `key` without an unlock record.
    pub async fn calculate_next_target_level(&self, key: &str) -> Result<Option<u32>> {
        let snapshot = self.snapshot().await?;
        let node = snapshot
            .node_by_key(key)
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))?;
        Ok(snapshot.next_target_level(node))
    }
}
