//! Prerequisite parsing and evaluation.
//!
//! A prerequisite is written as a string in the tree config:
//! - `"economy"` → the node `economy` must be unlocked (level ≥ 1)
//! - `"-nodes_unlocked_below_tier:2:5"` → at least 5 nodes below tier 2 unlocked
//! - `"-total_nodes_unlocked:10"` → at least 10 nodes unlocked overall
//!
//! Dynamic conditions are evaluated live against the current unlock set and
//! never cached inside the node.

use crate::error::{Result, TreeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A count-based availability condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DynamicPrerequisite {
    /// At least `count` distinct nodes with tier < `tier` are unlocked.
    NodesUnlockedBelowTier { tier: u32, count: u32 },
    /// At least `count` distinct nodes are unlocked.
    TotalNodesUnlocked { count: u32 },
}

impl DynamicPrerequisite {
    /// Evaluate against the tiers of every currently unlocked node.
    pub fn is_met(&self, unlocked_tiers: &[u32]) -> bool {
        match *self {
            DynamicPrerequisite::NodesUnlockedBelowTier { tier, count } => {
                let below = unlocked_tiers.iter().filter(|&&t| t < tier).count();
                below >= count as usize
            }
            DynamicPrerequisite::TotalNodesUnlocked { count } => {
                unlocked_tiers.len() >= count as usize
            }
        }
    }
}

impl fmt::Display for DynamicPrerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicPrerequisite::NodesUnlockedBelowTier { tier, count } => {
                write!(f, "-nodes_unlocked_below_tier:{}:{}", tier, count)
            }
            DynamicPrerequisite::TotalNodesUnlocked { count } => {
                write!(f, "-total_nodes_unlocked:{}", count)
            }
        }
    }
}

/// A parsed prerequisite entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prerequisite {
    /// Another node, by key.
    Static(String),
    /// An aggregate count condition.
    Dynamic(DynamicPrerequisite),
}

impl FromStr for Prerequisite {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self> {
        let Some(body) = s.strip_prefix('-') else {
            return Ok(Prerequisite::Static(s.to_string()));
        };

        let invalid = |reason: &str| TreeError::InvalidPrerequisite(s.to_string(), reason.to_string());
        let parse_num = |part: &str, what: &str| {
            part.parse::<u32>()
                .map_err(|_| invalid(&format!("{} must be a non-negative integer", what)))
        };

        let parts: Vec<&str> = body.split(':').collect();
        let dynamic = match parts.as_slice() {
            ["nodes_unlocked_below_tier", tier, count] => DynamicPrerequisite::NodesUnlockedBelowTier {
                tier: parse_num(*tier, "tier")?,
                count: parse_num(*count, "count")?,
            },
            ["nodes_unlocked_below_tier", ..] => {
                return Err(invalid("expected -nodes_unlocked_below_tier:tier:count"))
            }
            ["total_nodes_unlocked", count] => DynamicPrerequisite::TotalNodesUnlocked {
                count: parse_num(*count, "count")?,
            },
            ["total_nodes_unlocked", ..] => {
                return Err(invalid("expected -total_nodes_unlocked:count"))
            }
            _ => return Err(invalid("unknown dynamic prerequisite type")),
        };

        let count = match dynamic {
            DynamicPrerequisite::NodesUnlockedBelowTier { count, .. } => count,
            DynamicPrerequisite::TotalNodesUnlocked { count } => count,
        };
        if count == 0 {
            return Err(invalid("count must be > 0"));
        }

        Ok(Prerequisite::Dynamic(dynamic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_key_is_static() {
        assert_eq!(
            "economy".parse::<Prerequisite>().unwrap(),
            Prerequisite::Static("economy".into())
        );
    }

    #[test]
    fn parses_dynamic_forms() {
        assert_eq!(
            "-nodes_unlocked_below_tier:2:5".parse::<Prerequisite>().unwrap(),
            Prerequisite::Dynamic(DynamicPrerequisite::NodesUnlockedBelowTier { tier: 2, count: 5 })
        );
        assert_eq!(
            "-total_nodes_unlocked:10".parse::<Prerequisite>().unwrap(),
            Prerequisite::Dynamic(DynamicPrerequisite::TotalNodesUnlocked { count: 10 })
        );
    }

    #[test]
    fn rejects_malformed_dynamic() {
        let bad = [
            "-nodes_unlocked_below_tier:2",
            "-nodes_unlocked_below_tier:x:5",
            "-total_nodes_unlocked",
            "-total_nodes_unlocked:-3",
            "-total_nodes_unlocked:0",
            "-unknown:1",
        ];
        for s in bad {
            assert!(
                matches!(s.parse::<Prerequisite>(), Err(TreeError::InvalidPrerequisite(..))),
                "{} should be rejected",
                s
            );
        }
    }

    #[test]
    fn display_round_trips_syntax() {
        let p = DynamicPrerequisite::NodesUnlockedBelowTier { tier: 1, count: 3 };
        assert_eq!(p.to_string(), "-nodes_unlocked_below_tier:1:3");
    }

    #[test]
    fn evaluates_counts() {
        let below = DynamicPrerequisite::NodesUnlockedBelowTier { tier: 2, count: 2 };
        assert!(!below.is_met(&[0, 2, 3]));
        assert!(below.is_met(&[0, 1, 3]));

        let total = DynamicPrerequisite::TotalNodesUnlocked { count: 3 };
        assert!(!total.is_met(&[0, 0]));
        assert!(total.is_met(&[0, 0, 4]));
    }
}
