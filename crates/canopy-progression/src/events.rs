//! Progression events and the in-process event bus.
//!
//! Subscribers registered with [`EventBus::subscribe`] are called inline on
//! the publishing task, so cache invalidation is visible before `publish`
//! returns. Every event is also fanned out on a broadcast channel for
//! asynchronous consumers (notifications, webhooks).

use crate::model::{Node, NodeId, SessionId, UnlockSource};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 1024;

/// A candidate as shown to voters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSummary {
    /// 1-based index used when voting
    pub index: usize,
    pub node_key: String,
    pub display_name: String,
    pub target_level: u32,
    pub unlock_cost: u64,
}

impl OptionSummary {
    pub fn from_node(index: usize, node: &Node, target_level: u32) -> Self {
        Self {
            index,
            node_key: node.key.clone(),
            display_name: node.display_name.clone(),
            target_level,
            unlock_cost: node.unlock_cost,
        }
    }
}

/// Events produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressionEvent {
    /// A new accumulation target was chosen
    TargetSet {
        node_key: String,
        target_level: u32,
        auto_selected: bool,
        session_id: SessionId,
    },

    /// Voting opened, or a single candidate was auto-selected (`session_id` is None)
    VotingStarted {
        session_id: Option<SessionId>,
        options: Vec<OptionSummary>,
        previous_unlock: Option<String>,
        auto_selected: bool,
    },

    /// A node finished accumulating and unlocked
    CycleCompleted { node: Node },

    /// Nothing is left to unlock
    AllUnlocked { message: String },

    /// An unlock record was written
    NodeUnlocked {
        node_id: NodeId,
        node_key: String,
        level: u32,
        source: UnlockSource,
    },

    /// An unlock record was removed
    NodeRelocked {
        node_id: NodeId,
        node_key: String,
        level: u32,
    },
}

/// Synchronous event handler.
pub trait EventSubscriber: Send + Sync {
    fn handle(&self, event: &ProgressionEvent);
}

/// Event bus with inline subscribers and a broadcast fan-out.
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
    tx: broadcast::Sender<ProgressionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            subscribers: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Register an inline subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Receive every event published from now on.
    pub fn receiver(&self) -> broadcast::Receiver<ProgressionEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to subscribers, then to channel receivers.
    pub fn publish(&self, event: ProgressionEvent) {
        let subscribers = self.subscribers.read().clone();
        for subscriber in &subscribers {
            subscriber.handle(&event);
        }
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl EventSubscriber for Counter {
        fn handle(&self, event: &ProgressionEvent) {
            if matches!(event, ProgressionEvent::NodeUnlocked { .. }) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn subscribers_run_before_channel() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bus.subscribe(counter.clone());
        let mut rx = bus.receiver();

        bus.publish(ProgressionEvent::NodeUnlocked {
            node_id: NodeId(1),
            node_key: "economy".into(),
            level: 1,
            source: UnlockSource::Admin,
        });

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ProgressionEvent::NodeUnlocked { level: 1, .. }));
    }

    #[test]
    fn events_are_tagged() {
        let event = ProgressionEvent::AllUnlocked {
            message: "done".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "all_unlocked");
    }
}
