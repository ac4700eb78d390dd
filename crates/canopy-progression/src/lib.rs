//! Canopy Progression - crowd-funded unlock tree engine
//!
//! Community engagement is converted into contribution points that
//! accumulate toward one target node at a time. While a target accumulates,
//! the community votes on what comes next; when the target's cost is met it
//! unlocks, excess points roll over (capped), and the vote winner becomes the
//! new target.
//!
//! # Architecture
//!
//! - **Store**: `ProgressionStore` async trait with an in-memory implementation
//! - **Resolver**: availability over a point-in-time `TreeSnapshot`
//! - **Voting**: session state machine (voting, frozen, completed)
//! - **Progress**: contribution accumulation and the single-flight unlock trigger
//! - **Unlock / Transition**: unlock writes, rollover and next-target selection
//! - **Engagement**: weighted scoring, modifiers and velocity estimates
//! - **Events**: synchronous subscribers plus a broadcast stream
//!
//! # Example
//!
//! ```no_run
//! use canopy_progression::{MemoryIdentity, MemoryStore, ProgressionConfig, ProgressionService};
//! use canopy_tree::TreeConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ProgressionService::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemoryIdentity::new()),
//!         ProgressionConfig::default(),
//!     );
//!     let tree = TreeConfig::load("tree.json")?;
//!     service.sync_tree(&tree, "tree.json").await?;
//!     service.initialize_progression_state().await?;
//!     service.record_engagement("user-1", "message", 10).await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod cache;
pub mod config;
pub mod engagement;
pub mod error;
pub mod events;
pub mod identity;
pub mod memory;
pub mod model;
pub mod progress;
pub mod resolver;
pub mod service;
pub mod store;
pub mod sync;
pub mod tasks;
pub mod transition;
pub mod unlock;
pub mod views;
pub mod voting;

pub use config::ProgressionConfig;
pub use engagement::{Confidence, Trend, UnlockEstimate, VelocityMetrics};
pub use error::{Error, Result};
pub use events::{EventBus, EventSubscriber, OptionSummary, ProgressionEvent};
pub use identity::{IdentityProvider, MemoryIdentity};
pub use memory::MemoryStore;
pub use model::{
    ContributorScore, EngagementMetric, Node, NodeId, OptionId, ProgressId, SessionId,
    SessionStatus, Unlock, UnlockProgress, UnlockSource, UserEngagement, VotingOption,
    VotingSession,
};
pub use resolver::TreeSnapshot;
pub use service::ProgressionService;
pub use store::ProgressionStore;
pub use sync::SyncReport;
pub use unlock::capped_rollover;
pub use views::{NodeDetails, ProgressionStatus, TargetSummary, TreeNodeView};
pub use voting::find_winning_option;
