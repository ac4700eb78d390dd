//! Canopy Tree - the unlock tree model.
//!
//! A community unlock tree is a DAG of gated nodes. Each node costs a number
//! of contribution points per level and may depend on other nodes (AND logic)
//! or on aggregate unlock counts.
//!
//! # Architecture
//!
//! - **Cost**: `unlock_cost(tier, size)` scales a size-based base cost by 1.5^tier
//! - **Prerequisites**: static node keys and dynamic count conditions
//! - **Modifiers**: level-scaled values attached to upgrade nodes
//! - **Config**: JSON tree definitions, validated with DFS coloring
//!
//! # Example
//!
//! ```
//! use canopy_tree::{unlock_cost, NodeSize};
//!
//! assert_eq!(unlock_cost(0, NodeSize::Small), 500);
//! assert_eq!(unlock_cost(2, NodeSize::Medium), 2250);
//! ```

pub mod config;
pub mod cost;
pub mod error;
pub mod modifier;
pub mod node;
pub mod prerequisite;

pub use config::{NodeConfig, TreeConfig};
pub use cost::{unlock_cost, NodeSize, TIER_SCALING_FACTOR};
pub use error::{Result, TreeError};
pub use modifier::{ModifierConfig, ModifierType};
pub use node::{item_key, NodeKind, ITEM_KEY_PREFIX};
pub use prerequisite::{DynamicPrerequisite, Prerequisite};
