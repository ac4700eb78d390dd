//! The progression service handle.
//!
//! `ProgressionService` is a cheap-to-clone handle over shared state. The
//! operations are grouped by concern across the crate:
//!
//! - `resolver`: availability and required nodes
//! - `voting`: session lifecycle and votes
//! - `progress`: contributions and the single-flight unlock trigger
//! - `unlock`: the unlock write and rollover
//! - `transition`: choosing the next target after an unlock
//! - `engagement`: weighted scoring, modifiers and velocity
//! - `admin`: overrides, reset and boot-time initialization
//! - `sync`: applying a tree config to the store

use crate::cache::Caches;
use crate::config::ProgressionConfig;
use crate::error::Result;
use crate::events::{EventBus, ProgressionEvent};
use crate::identity::IdentityProvider;
use crate::store::ProgressionStore;
use crate::tasks::BackgroundTasks;
use canopy_tree::item_key;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Semaphore};

struct Inner {
    store: Arc<dyn ProgressionStore>,
    identity: Arc<dyn IdentityProvider>,
    events: Arc<EventBus>,
    caches: Arc<Caches>,
    config: ProgressionConfig,
    /// Capacity 1: at most one unlock execution in flight
    unlock_slot: Arc<Semaphore>,
    /// Serializes session lifecycle changes within this instance
    session_lock: Mutex<()>,
    tasks: BackgroundTasks,
}

/// Progression engine for one community unlock tree.
#[derive(Clone)]
pub struct ProgressionService {
    inner: Arc<Inner>,
}

impl ProgressionService {
    /// Create a service with its own event bus.
    pub fn new(
        store: Arc<dyn ProgressionStore>,
        identity: Arc<dyn IdentityProvider>,
        config: ProgressionConfig,
    ) -> Self {
        Self::with_event_bus(store, identity, Arc::new(EventBus::new()), config)
    }

    /// Create a service publishing to an existing bus.
    ///
    /// The service's caches subscribe to the bus, so node unlock and relock
    /// events from any publisher invalidate them.
    pub fn with_event_bus(
        store: Arc<dyn ProgressionStore>,
        identity: Arc<dyn IdentityProvider>,
        events: Arc<EventBus>,
        config: ProgressionConfig,
    ) -> Self {
        let caches = Arc::new(Caches::new(config.modifier_cache_ttl, config.weight_cache_ttl));
        events.subscribe(caches.clone());

        let tasks = BackgroundTasks::new(config.task_timeout);
        Self {
            inner: Arc::new(Inner {
                store,
                identity,
                events,
                caches,
                config,
                unlock_slot: Arc::new(Semaphore::new(1)),
                session_lock: Mutex::new(()),
                tasks,
            }),
        }
    }

    pub fn config(&self) -> &ProgressionConfig {
        &self.inner.config
    }

    /// The bus this service publishes to.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub(crate) fn store(&self) -> &dyn ProgressionStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn identity(&self) -> &dyn IdentityProvider {
        self.inner.identity.as_ref()
    }

    pub(crate) fn caches(&self) -> &Caches {
        &self.inner.caches
    }

    pub(crate) fn unlock_slot(&self) -> &Arc<Semaphore> {
        &self.inner.unlock_slot
    }

    pub(crate) async fn lock_sessions(&self) -> MutexGuard<'_, ()> {
        self.inner.session_lock.lock().await
    }

    pub(crate) fn publish(&self, event: ProgressionEvent) {
        self.inner.events.publish(event);
    }

    pub(crate) fn spawn_task<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tasks.spawn(name, task)
    }

    // --- Feature checks ---

    /// Whether `key` is unlocked at `level` or higher. Unknown keys are locked.
    pub async fn is_node_unlocked(&self, key: &str, level: u32) -> Result<bool> {
        if let Some(unlocked) = self.caches().unlocks.get(key, level) {
            return Ok(unlocked);
        }
        let Some(node) = self.store().node_by_key(key).await? else {
            return Ok(false);
        };
        let unlocked = self
            .store()
            .unlocks()
            .await?
            .iter()
            .any(|u| u.node_id == node.id && u.level >= level);
        self.caches().unlocks.insert(key, level, unlocked);
        Ok(unlocked)
    }

    /// Whether a feature node is unlocked at level 1.
    pub async fn is_feature_unlocked(&self, key: &str) -> Result<bool> {
        self.is_node_unlocked(key, 1).await
    }

    /// Whether the item node for `item_name` is unlocked.
    pub async fn is_item_unlocked(&self, item_name: &str) -> Result<bool> {
        self.is_feature_unlocked(&item_key(item_name)).await
    }

    /// Batch item check keyed by item name.
    pub async fn are_items_unlocked(&self, item_names: &[&str]) -> Result<HashMap<String, bool>> {
        let mut result = HashMap::with_capacity(item_names.len());
        for name in item_names {
            let unlocked = self.is_item_unlocked(name).await?;
            result.insert(name.to_string(), unlocked);
        }
        Ok(result)
    }

    // --- Lifecycle ---

    /// Number of background tasks still running.
    pub fn background_tasks(&self) -> usize {
        self.inner.tasks.active()
    }

    /// Wait for background work to drain. Returns false on timeout.
    pub async fn wait_for_background_tasks(&self, deadline: Duration) -> bool {
        self.inner.tasks.wait_idle_for(deadline).await
    }

    /// Cancel background work and wait for it, up to `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        tracing::info!(active = self.background_tasks(), "progression service shutting down");
        self.inner.tasks.shutdown(deadline).await
    }
}
