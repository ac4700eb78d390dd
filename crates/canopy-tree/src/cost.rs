//! Unlock cost model.
//!
//! Cost grows exponentially with tier and linearly with size:
//! - small → 500, medium → 1000, large → 2000 (1:2:4)
//! - each tier multiplies the base by 1.5, rounded to the nearest point

use crate::error::TreeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base cost of a small node.
pub const BASE_COST_SMALL: u64 = 500;

/// Base cost of a medium node.
pub const BASE_COST_MEDIUM: u64 = 1000;

/// Base cost of a large node.
pub const BASE_COST_LARGE: u64 = 2000;

/// Per-tier exponential multiplier.
pub const TIER_SCALING_FACTOR: f64 = 1.5;

/// Relative size of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeSize {
    Small,
    Medium,
    Large,
}

impl NodeSize {
    /// Base cost before tier scaling.
    pub const fn base_cost(self) -> u64 {
        match self {
            NodeSize::Small => BASE_COST_SMALL,
            NodeSize::Medium => BASE_COST_MEDIUM,
            NodeSize::Large => BASE_COST_LARGE,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            NodeSize::Small => "small",
            NodeSize::Medium => "medium",
            NodeSize::Large => "large",
        }
    }
}

impl fmt::Display for NodeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeSize {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(NodeSize::Small),
            "medium" => Ok(NodeSize::Medium),
            "large" => Ok(NodeSize::Large),
            other => Err(TreeError::InvalidSize(other.to_string())),
        }
    }
}

/// Calculate the per-level unlock cost of a node.
///
/// Formula: round(base(size) × 1.5^tier)
///
/// # Examples
///
/// ```
/// use canopy_tree::{unlock_cost, NodeSize};
///
/// assert_eq!(unlock_cost(0, NodeSize::Large), 2000);
/// assert_eq!(unlock_cost(1, NodeSize::Small), 750);
/// assert_eq!(unlock_cost(4, NodeSize::Small), 2531); // 500 × 5.0625
/// ```
pub fn unlock_cost(tier: u32, size: NodeSize) -> u64 {
    let scale = TIER_SCALING_FACTOR.powi(tier as i32);
    (size.base_cost() as f64 * scale).round() as u64
}
