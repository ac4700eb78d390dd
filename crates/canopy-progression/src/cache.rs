//! Cache layer.
//!
//! - unlock status per (node key, level), no expiry, invalidated by events
//! - modifier sets per feature key, TTL
//! - engagement weights per metric type, TTL
//! - the current target's cost paired with the progress row it belongs to
//!
//! Locks are held only to copy values in or out, never across an await.

use crate::events::{EventSubscriber, ProgressionEvent};
use crate::model::ProgressId;
use canopy_tree::ModifierConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Unlock status cache.
#[derive(Debug, Default)]
pub struct UnlockCache {
    entries: RwLock<HashMap<(String, u32), bool>>,
}

impl UnlockCache {
    pub fn get(&self, key: &str, level: u32) -> Option<bool> {
        self.entries.read().get(&(key.to_string(), level)).copied()
    }

    pub fn insert(&self, key: &str, level: u32, unlocked: bool) {
        self.entries.write().insert((key.to_string(), level), unlocked);
    }

    /// Drop every level of one node.
    pub fn invalidate_node(&self, key: &str) {
        self.entries.write().retain(|(k, _), _| k != key);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Map whose entries expire after a fixed time-to-live.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (V, Instant)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh value for a key, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        let (value, stored_at) = entries.get(key)?;
        if stored_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.write().insert(key, (value, Instant::now()));
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Cost of the current target and the progress row it was cached for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedTarget {
    pub cost: u64,
    pub progress_id: ProgressId,
}

/// Fast-path target cost.
#[derive(Debug, Default)]
pub struct TargetCache {
    inner: RwLock<Option<CachedTarget>>,
}

impl TargetCache {
    pub fn get(&self) -> Option<CachedTarget> {
        *self.inner.read()
    }

    pub fn set(&self, cost: u64, progress_id: ProgressId) {
        *self.inner.write() = Some(CachedTarget { cost, progress_id });
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

/// All engine caches.
#[derive(Debug)]
pub struct Caches {
    pub unlocks: UnlockCache,
    /// feature key → (modifier, current level) for every unlocked node
    pub modifiers: TtlCache<String, Vec<(ModifierConfig, u32)>>,
    pub weights: TtlCache<String, f64>,
    pub target: TargetCache,
}

impl Caches {
    pub fn new(modifier_ttl: Duration, weight_ttl: Duration) -> Self {
        Self {
            unlocks: UnlockCache::default(),
            modifiers: TtlCache::new(modifier_ttl),
            weights: TtlCache::new(weight_ttl),
            target: TargetCache::default(),
        }
    }

    /// Drop everything (tree reset).
    pub fn clear_all(&self) {
        self.unlocks.clear();
        self.modifiers.clear();
        self.weights.clear();
        self.target.clear();
    }
}

impl EventSubscriber for Caches {
    fn handle(&self, event: &ProgressionEvent) {
        match event {
            ProgressionEvent::NodeUnlocked { node_key, .. }
            | ProgressionEvent::NodeRelocked { node_key, .. } => {
                self.unlocks.invalidate_node(node_key);
                self.modifiers.clear();
                tracing::debug!(node_key = %node_key, "invalidated unlock and modifier caches");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeId, UnlockSource};

    #[test]
    fn ttl_entries_expire() {
        let cache: TtlCache<String, f64> = TtlCache::new(Duration::from_millis(20));
        cache.insert("message".into(), 1.5);
        assert_eq!(cache.get(&"message".to_string()), Some(1.5));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"message".to_string()), None);
    }

    #[test]
    fn unlock_events_invalidate_only_that_node() {
        let caches = Caches::new(Duration::from_secs(60), Duration::from_secs(60));
        caches.unlocks.insert("economy", 1, false);
        caches.unlocks.insert("economy", 2, false);
        caches.unlocks.insert("combat", 1, true);
        caches.modifiers.insert("progression_rate".into(), Vec::new());

        caches.handle(&ProgressionEvent::NodeUnlocked {
            node_id: NodeId(1),
            node_key: "economy".into(),
            level: 1,
            source: UnlockSource::Vote,
        });

        assert_eq!(caches.unlocks.get("economy", 1), None);
        assert_eq!(caches.unlocks.get("economy", 2), None);
        assert_eq!(caches.unlocks.get("combat", 1), Some(true));
        assert!(caches.modifiers.get(&"progression_rate".to_string()).is_none());
    }

    #[test]
    fn target_cache_round_trip() {
        let cache = TargetCache::default();
        assert!(cache.get().is_none());
        cache.set(500, ProgressId(7));
        assert_eq!(
            cache.get(),
            Some(CachedTarget {
                cost: 500,
                progress_id: ProgressId(7)
            })
        );
        cache.clear();
        assert!(cache.get().is_none());
    }
}
