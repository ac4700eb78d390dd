//! Shared fixtures for progression integration tests.

#![allow(dead_code)]

use canopy_progression::{
    MemoryIdentity, MemoryStore, ProgressionConfig, ProgressionEvent, ProgressionService,
    ProgressionStore,
};
use canopy_tree::TreeConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound for background work to drain in tests.
pub const SETTLE: Duration = Duration::from_secs(5);

pub struct Harness {
    pub service: ProgressionService,
    pub store: Arc<MemoryStore>,
    pub identity: Arc<MemoryIdentity>,
}

/// A tier-`tier` small feature node, max level 1.
pub fn node(key: &str, tier: u32, prerequisites: &[&str]) -> Value {
    json!({
        "key": key,
        "name": key.to_uppercase(),
        "type": "feature",
        "tier": tier,
        "size": "small",
        "max_level": 1,
        "category": "test",
        "prerequisites": prerequisites,
    })
}

pub fn tree(nodes: Vec<Value>) -> TreeConfig {
    serde_json::from_value(json!({
        "version": "1.0",
        "description": "test tree",
        "nodes": nodes,
    }))
    .expect("test tree should deserialize")
}

pub async fn harness(nodes: Vec<Value>) -> Harness {
    harness_with(nodes, ProgressionConfig::default()).await
}

pub async fn harness_with(nodes: Vec<Value>, config: ProgressionConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MemoryIdentity::new());
    let service = ProgressionService::new(store.clone(), identity.clone(), config);
    service
        .sync_tree(&tree(nodes), "test")
        .await
        .expect("test tree should sync");
    Harness {
        service,
        store,
        identity,
    }
}

impl Harness {
    /// Wait for every background task to finish.
    pub async fn settle(&self) {
        assert!(
            self.service.wait_for_background_tasks(SETTLE).await,
            "background tasks did not drain"
        );
    }

    /// Key of the node the active progress row targets.
    pub async fn target_key(&self) -> Option<String> {
        let progress = self.store.active_progress().await.unwrap()?;
        let node = self.store.node(progress.node_id?).await.unwrap()?;
        Some(node.key)
    }

    pub async fn accumulated(&self) -> u64 {
        self.store
            .active_progress()
            .await
            .unwrap()
            .map(|p| p.contributions_accumulated)
            .unwrap_or(0)
    }

    pub async fn unlocked(&self, key: &str) -> bool {
        self.service.is_feature_unlocked(key).await.unwrap()
    }

    /// Number of unlock records for a node across all levels.
    pub async fn unlock_records(&self, key: &str) -> usize {
        let node = self.store.node_by_key(key).await.unwrap().unwrap();
        self.store
            .unlocks()
            .await
            .unwrap()
            .iter()
            .filter(|u| u.node_id == node.id)
            .count()
    }
}

/// Everything already published on a receiver.
pub fn drain(rx: &mut broadcast::Receiver<ProgressionEvent>) -> Vec<ProgressionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
