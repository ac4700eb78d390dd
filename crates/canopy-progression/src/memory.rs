//! In-memory store.
//!
//! A single `RwLock` guards all tables, so every trait method is atomic with
//! respect to the others. Used by the daemon and by tests.

use crate::error::{Error, Result};
use crate::model::{
    ContributorScore, DailyTotals, EngagementMetric, NewNode, Node, NodeId, OptionId,
    ProgressId, ResetRecord, SessionId, SessionStatus, SyncMetadata, Unlock, UnlockProgress,
    UnlockSource, UserEngagement, VotingOption, VotingSession,
};
use crate::store::ProgressionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug)]
struct SessionRow {
    status: SessionStatus,
    options: Vec<OptionId>,
    winner: Option<OptionId>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct OptionRow {
    session: SessionId,
    node_id: NodeId,
    target_level: u32,
    vote_count: u32,
    last_vote_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    nodes: BTreeMap<NodeId, Node>,
    /// node → required nodes
    prerequisites: BTreeMap<NodeId, Vec<NodeId>>,
    unlocks: BTreeMap<(NodeId, u32), Unlock>,
    sessions: BTreeMap<SessionId, SessionRow>,
    options: HashMap<OptionId, OptionRow>,
    votes: HashSet<(SessionId, String)>,
    progress: BTreeMap<ProgressId, UnlockProgress>,
    metrics: Vec<EngagementMetric>,
    weights: HashMap<String, f64>,
    sync: HashMap<String, SyncMetadata>,
    resets: Vec<ResetRecord>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::Store(format!("node {} does not exist", id)))
    }

    fn build_session(&self, id: SessionId, row: &SessionRow) -> Result<VotingSession> {
        let mut options = Vec::with_capacity(row.options.len());
        for option_id in &row.options {
            let Some(opt) = self.options.get(option_id) else {
                continue;
            };
            options.push(VotingOption {
                id: *option_id,
                node_id: opt.node_id,
                target_level: opt.target_level,
                vote_count: opt.vote_count,
                last_highest_vote_at: opt.last_vote_at,
                node: self.node(opt.node_id)?.clone(),
            });
        }
        Ok(VotingSession {
            id,
            status: row.status,
            options,
            winning_option_id: row.winner,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }

    fn active_progress(&self) -> Option<&UnlockProgress> {
        self.progress.values().rev().find(|p| p.is_active())
    }

    fn open_progress(&mut self, seed: u64) -> UnlockProgress {
        let progress = UnlockProgress {
            id: ProgressId(self.next_id()),
            node_id: None,
            target_level: None,
            contributions_accumulated: seed,
            voting_session_id: None,
            started_at: Utc::now(),
            unlocked_at: None,
        };
        self.progress.insert(progress.id, progress.clone());
        progress
    }
}

/// Store backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_complete_progress: AtomicBool,
    close_before_contribution: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the weight used for a metric type.
    pub async fn set_engagement_weight(&self, metric_type: &str, weight: f64) {
        self.tables
            .write()
            .await
            .weights
            .insert(metric_type.to_string(), weight);
    }

    /// Make `complete_progress` fail until cleared.
    pub fn fail_complete_progress(&self, fail: bool) {
        self.fail_complete_progress.store(fail, Ordering::SeqCst);
    }

    /// Complete the active row just before the next contribution is applied,
    /// as a concurrent unlock would.
    pub fn close_progress_before_next_contribution(&self) {
        self.close_before_contribution.store(true, Ordering::SeqCst);
    }

    /// Reset audit entries, oldest first.
    pub async fn reset_history(&self) -> Vec<ResetRecord> {
        self.tables.read().await.resets.clone()
    }

    /// Record a metric with an explicit timestamp.
    pub async fn backfill_engagement(&self, metric: EngagementMetric) {
        self.tables.write().await.metrics.push(metric);
    }
}

#[async_trait]
impl ProgressionStore for MemoryStore {
    // --- Nodes ---

    async fn node(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.tables.read().await.nodes.get(&id).cloned())
    }

    async fn node_by_key(&self, key: &str) -> Result<Option<Node>> {
        let tables = self.tables.read().await;
        Ok(tables.nodes.values().find(|n| n.key == key).cloned())
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        let tables = self.tables.read().await;
        let mut nodes: Vec<Node> = tables.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| (a.tier, a.sort_order, &a.key).cmp(&(b.tier, b.sort_order, &b.key)));
        Ok(nodes)
    }

    async fn insert_node(&self, node: NewNode) -> Result<NodeId> {
        let mut tables = self.tables.write().await;
        if tables.nodes.values().any(|n| n.key == node.key) {
            return Err(Error::Store(format!("node key {} already exists", node.key)));
        }
        let id = NodeId(tables.next_id());
        tables.nodes.insert(
            id,
            Node {
                id,
                key: node.key,
                display_name: node.display_name,
                description: node.description,
                kind: node.kind,
                tier: node.tier,
                size: node.size,
                category: node.category,
                max_level: node.max_level,
                unlock_cost: node.unlock_cost,
                sort_order: node.sort_order,
                auto_unlock: node.auto_unlock,
                dynamic_prerequisites: node.dynamic_prerequisites,
                modifier: node.modifier,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn update_node(&self, id: NodeId, node: NewNode) -> Result<()> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("node {} does not exist", id)))?;
        existing.display_name = node.display_name;
        existing.description = node.description;
        existing.kind = node.kind;
        existing.tier = node.tier;
        existing.size = node.size;
        existing.category = node.category;
        existing.max_level = node.max_level;
        existing.unlock_cost = node.unlock_cost;
        existing.sort_order = node.sort_order;
        existing.auto_unlock = node.auto_unlock;
        existing.dynamic_prerequisites = node.dynamic_prerequisites;
        existing.modifier = node.modifier;
        Ok(())
    }

    async fn set_prerequisites(&self, id: NodeId, prerequisites: Vec<NodeId>) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.node(id)?;
        for p in &prerequisites {
            tables.node(*p)?;
        }
        tables.prerequisites.insert(id, prerequisites);
        Ok(())
    }

    async fn prerequisites(&self, id: NodeId) -> Result<Vec<Node>> {
        let tables = self.tables.read().await;
        let ids = tables.prerequisites.get(&id).cloned().unwrap_or_default();
        ids.into_iter().map(|p| tables.node(p).cloned()).collect()
    }

    async fn dependents(&self, id: NodeId) -> Result<Vec<Node>> {
        let tables = self.tables.read().await;
        tables
            .prerequisites
            .iter()
            .filter(|(_, reqs)| reqs.contains(&id))
            .map(|(node, _)| tables.node(*node).cloned())
            .collect()
    }

    async fn prerequisite_edges(&self) -> Result<Vec<(NodeId, NodeId)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .prerequisites
            .iter()
            .flat_map(|(node, reqs)| reqs.iter().map(move |r| (*node, *r)))
            .collect())
    }

    // --- Unlocks ---

    async fn unlocks(&self) -> Result<Vec<Unlock>> {
        Ok(self.tables.read().await.unlocks.values().cloned().collect())
    }

    async fn unlock(&self, id: NodeId, level: u32) -> Result<Option<Unlock>> {
        Ok(self.tables.read().await.unlocks.get(&(id, level)).cloned())
    }

    async fn unlock_node(
        &self,
        id: NodeId,
        level: u32,
        source: UnlockSource,
        contribution_score: u64,
    ) -> Result<Unlock> {
        let mut tables = self.tables.write().await;
        tables.node(id)?;
        let unlock = tables
            .unlocks
            .entry((id, level))
            .or_insert_with(|| Unlock {
                node_id: id,
                level,
                unlocked_by: source,
                contribution_score,
                unlocked_at: Utc::now(),
            })
            .clone();
        Ok(unlock)
    }

    async fn relock_node(&self, id: NodeId, level: u32) -> Result<bool> {
        Ok(self.tables.write().await.unlocks.remove(&(id, level)).is_some())
    }

    // --- Voting ---

    async fn create_session(&self) -> Result<SessionId> {
        let mut tables = self.tables.write().await;
        let id = SessionId(tables.next_id());
        tables.sessions.insert(
            id,
            SessionRow {
                status: SessionStatus::Voting,
                options: Vec::new(),
                winner: None,
                started_at: Utc::now(),
                ended_at: None,
            },
        );
        Ok(id)
    }

    async fn add_option(
        &self,
        session: SessionId,
        node: NodeId,
        target_level: u32,
    ) -> Result<OptionId> {
        let mut tables = self.tables.write().await;
        tables.node(node)?;
        if !tables.sessions.contains_key(&session) {
            return Err(Error::Store(format!("session {} does not exist", session)));
        }
        let id = OptionId(tables.next_id());
        tables.options.insert(
            id,
            OptionRow {
                session,
                node_id: node,
                target_level,
                vote_count: 0,
                last_vote_at: None,
            },
        );
        if let Some(row) = tables.sessions.get_mut(&session) {
            row.options.push(id);
        }
        Ok(id)
    }

    async fn session(&self, id: SessionId) -> Result<Option<VotingSession>> {
        let tables = self.tables.read().await;
        match tables.sessions.get(&id) {
            Some(row) => Ok(Some(tables.build_session(id, row)?)),
            None => Ok(None),
        }
    }

    async fn open_session(&self) -> Result<Option<VotingSession>> {
        let tables = self.tables.read().await;
        match tables.sessions.iter().rev().find(|(_, s)| s.status != SessionStatus::Completed) {
            Some((id, row)) => Ok(Some(tables.build_session(*id, row)?)),
            None => Ok(None),
        }
    }

    async fn latest_session(&self) -> Result<Option<VotingSession>> {
        let tables = self.tables.read().await;
        match tables.sessions.iter().next_back() {
            Some((id, row)) => Ok(Some(tables.build_session(*id, row)?)),
            None => Ok(None),
        }
    }

    async fn record_vote(&self, user_id: &str, session: SessionId, option: OptionId) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.sessions.get(&session) {
            Some(row) if row.status == SessionStatus::Voting => {}
            _ => return Err(Error::NoActiveSession),
        }
        match tables.options.get(&option) {
            Some(opt) if opt.session == session => {}
            _ => {
                return Err(Error::Store(format!(
                    "option {} is not part of session {}",
                    option, session
                )))
            }
        }
        if !tables.votes.insert((session, user_id.to_string())) {
            return Err(Error::UserAlreadyVoted);
        }
        if let Some(opt) = tables.options.get_mut(&option) {
            opt.vote_count += 1;
            opt.last_vote_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("session {} does not exist", id)))?;
        row.status = status;
        Ok(())
    }

    async fn end_session(&self, id: SessionId, winner: Option<OptionId>) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(w) = winner {
            match tables.options.get(&w) {
                Some(opt) if opt.session == id => {}
                _ => {
                    return Err(Error::Store(format!(
                        "winner {} is not part of session {}",
                        w, id
                    )))
                }
            }
        }
        let row = tables
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("session {} does not exist", id)))?;
        row.status = SessionStatus::Completed;
        row.winner = winner;
        row.ended_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    // --- Progress ---

    async fn create_progress(&self) -> Result<UnlockProgress> {
        let mut tables = self.tables.write().await;
        if let Some(active) = tables.active_progress() {
            return Ok(active.clone());
        }
        Ok(tables.open_progress(0))
    }

    async fn active_progress(&self) -> Result<Option<UnlockProgress>> {
        Ok(self.tables.read().await.active_progress().cloned())
    }

    async fn add_contribution(&self, id: ProgressId, amount: u64) -> Result<()> {
        let mut tables = self.tables.write().await;
        if self.close_before_contribution.swap(false, Ordering::SeqCst) {
            if let Some(active) = tables.progress.values_mut().find(|p| p.is_active()) {
                active.unlocked_at = Some(Utc::now());
            }
            tables.open_progress(0);
        }
        let progress = tables
            .progress
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("progress {} does not exist", id)))?;
        if !progress.is_active() {
            return Err(Error::StaleProgress(id));
        }
        progress.contributions_accumulated += amount;
        Ok(())
    }

    async fn set_progress_target(
        &self,
        id: ProgressId,
        node: NodeId,
        target_level: u32,
        session: SessionId,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.node(node)?;
        if !tables.sessions.contains_key(&session) {
            return Err(Error::Store(format!("session {} does not exist", session)));
        }
        let progress = tables
            .progress
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("progress {} does not exist", id)))?;
        progress.node_id = Some(node);
        progress.target_level = Some(target_level);
        progress.voting_session_id = Some(session);
        Ok(())
    }

    async fn complete_progress(&self, id: ProgressId, rollover: u64) -> Result<ProgressId> {
        if self.fail_complete_progress.load(Ordering::SeqCst) {
            return Err(Error::Store("complete_progress unavailable".into()));
        }
        let mut tables = self.tables.write().await;
        let progress = tables
            .progress
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("progress {} does not exist", id)))?;
        if !progress.is_active() {
            return Err(Error::Store(format!("progress {} is already complete", id)));
        }
        progress.unlocked_at = Some(Utc::now());
        Ok(tables.open_progress(rollover).id)
    }

    async fn clear_progress_target(&self, node: NodeId) -> Result<()> {
        let mut tables = self.tables.write().await;
        for progress in tables.progress.values_mut() {
            if progress.is_active() && progress.node_id == Some(node) {
                progress.node_id = None;
                progress.target_level = None;
                progress.voting_session_id = None;
            }
        }
        Ok(())
    }

    // --- Engagement ---

    async fn record_engagement(&self, metric: EngagementMetric) -> Result<()> {
        self.tables.write().await.metrics.push(metric);
        Ok(())
    }

    async fn engagement_weights(&self) -> Result<HashMap<String, f64>> {
        Ok(self.tables.read().await.weights.clone())
    }

    async fn engagement_score(&self) -> Result<u64> {
        Ok(self.tables.read().await.metrics.iter().map(|m| m.points).sum())
    }

    async fn user_engagement(&self, user_id: &str) -> Result<UserEngagement> {
        let tables = self.tables.read().await;
        let mut engagement = UserEngagement {
            user_id: user_id.to_string(),
            ..Default::default()
        };
        for m in tables.metrics.iter().filter(|m| m.user_id == user_id) {
            *engagement.by_metric.entry(m.metric_type.clone()).or_default() += m.value;
            engagement.total_points += m.points;
        }
        Ok(engagement)
    }

    async fn contribution_leaderboard(&self, limit: usize) -> Result<Vec<ContributorScore>> {
        let tables = self.tables.read().await;
        let mut totals: HashMap<&str, u64> = HashMap::new();
        for m in &tables.metrics {
            *totals.entry(m.user_id.as_str()).or_default() += m.points;
        }
        let mut board: Vec<ContributorScore> = totals
            .into_iter()
            .map(|(user_id, points)| ContributorScore {
                user_id: user_id.to_string(),
                points,
            })
            .collect();
        board.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.user_id.cmp(&b.user_id)));
        board.truncate(limit);
        Ok(board)
    }

    async fn daily_contributions(&self, since: DateTime<Utc>) -> Result<DailyTotals> {
        let tables = self.tables.read().await;
        let mut totals = DailyTotals::new();
        for m in tables.metrics.iter().filter(|m| m.recorded_at >= since) {
            *totals.entry(m.recorded_at.date_naive()).or_default() += m.points;
        }
        Ok(totals)
    }

    // --- Sync & reset ---

    async fn sync_metadata(&self, config_name: &str) -> Result<Option<SyncMetadata>> {
        Ok(self.tables.read().await.sync.get(config_name).cloned())
    }

    async fn put_sync_metadata(&self, metadata: SyncMetadata) -> Result<()> {
        self.tables
            .write()
            .await
            .sync
            .insert(metadata.config_name.clone(), metadata);
        Ok(())
    }

    async fn reset_tree(&self, record: ResetRecord, preserve_user_data: bool) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let removed = tables.unlocks.len();
        tables.unlocks.clear();
        tables.sessions.clear();
        tables.options.clear();
        tables.votes.clear();
        tables.progress.clear();
        if !preserve_user_data {
            tables.metrics.clear();
        }
        tables.resets.push(record);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_tree::{NodeKind, NodeSize};

    fn new_node(key: &str) -> NewNode {
        NewNode {
            key: key.into(),
            display_name: key.into(),
            description: String::new(),
            kind: NodeKind::Feature,
            tier: 0,
            size: NodeSize::Small,
            category: "test".into(),
            max_level: 1,
            unlock_cost: 500,
            sort_order: 0,
            auto_unlock: false,
            dynamic_prerequisites: Vec::new(),
            modifier: None,
        }
    }

    #[tokio::test]
    async fn only_one_active_progress() {
        let store = MemoryStore::new();
        let first = store.create_progress().await.unwrap();
        let again = store.create_progress().await.unwrap();
        assert_eq!(first.id, again.id);

        let next = store.complete_progress(first.id, 150).await.unwrap();
        let active = store.active_progress().await.unwrap().unwrap();
        assert_eq!(active.id, next);
        assert_eq!(active.contributions_accumulated, 150);
        assert!(store.complete_progress(first.id, 0).await.is_err());
    }

    #[tokio::test]
    async fn contributions_to_completed_progress_are_rejected() {
        let store = MemoryStore::new();
        let first = store.create_progress().await.unwrap();
        store.add_contribution(first.id, 100).await.unwrap();
        store.complete_progress(first.id, 0).await.unwrap();

        assert!(matches!(
            store.add_contribution(first.id, 50).await,
            Err(Error::StaleProgress(id)) if id == first.id
        ));
        let active = store.active_progress().await.unwrap().unwrap();
        assert_ne!(active.id, first.id);
        assert_eq!(active.contributions_accumulated, 0);
    }

    #[tokio::test]
    async fn record_vote_rejects_repeat_and_closed_sessions() {
        let store = MemoryStore::new();
        let node = store.insert_node(new_node("a")).await.unwrap();
        let session = store.create_session().await.unwrap();
        let option = store.add_option(session, node, 1).await.unwrap();

        store.record_vote("alice", session, option).await.unwrap();
        assert!(matches!(
            store.record_vote("alice", session, option).await,
            Err(Error::UserAlreadyVoted)
        ));

        store.set_session_status(session, SessionStatus::Frozen).await.unwrap();
        assert!(matches!(
            store.record_vote("bob", session, option).await,
            Err(Error::NoActiveSession)
        ));

        let s = store.session(session).await.unwrap().unwrap();
        assert_eq!(s.options[0].vote_count, 1);
        assert!(s.options[0].last_highest_vote_at.is_some());
    }

    #[tokio::test]
    async fn open_session_ignores_completed() {
        let store = MemoryStore::new();
        let s1 = store.create_session().await.unwrap();
        store.end_session(s1, None).await.unwrap();
        assert!(store.open_session().await.unwrap().is_none());
        assert_eq!(store.latest_session().await.unwrap().unwrap().id, s1);

        let s2 = store.create_session().await.unwrap();
        store.set_session_status(s2, SessionStatus::Frozen).await.unwrap();
        assert_eq!(store.open_session().await.unwrap().unwrap().id, s2);
    }

    #[tokio::test]
    async fn duplicate_unlock_keeps_first_record() {
        let store = MemoryStore::new();
        let node = store.insert_node(new_node("a")).await.unwrap();
        store.unlock_node(node, 1, UnlockSource::Vote, 500).await.unwrap();
        let again = store.unlock_node(node, 1, UnlockSource::Admin, 0).await.unwrap();
        assert_eq!(again.unlocked_by, UnlockSource::Vote);
        assert_eq!(store.unlocks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dependents_follow_edges() {
        let store = MemoryStore::new();
        let a = store.insert_node(new_node("a")).await.unwrap();
        let b = store.insert_node(new_node("b")).await.unwrap();
        store.set_prerequisites(b, vec![a]).await.unwrap();

        let deps = store.dependents(a).await.unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].key, "b");
        assert_eq!(store.prerequisites(b).await.unwrap()[0].key, "a");
        assert!(store.insert_node(new_node("a")).await.is_err());
    }
}
