//! Tree configuration loading and validation.
//!
//! A tree is defined in JSON:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "description": "Community unlock tree",
//!   "nodes": [
//!     { "key": "economy", "name": "Economy", "type": "feature",
//!       "tier": 0, "size": "small", "max_level": 1, "category": "economy",
//!       "auto_unlock": true },
//!     { "key": "item_lootbox", "name": "Lootbox", "type": "item",
//!       "tier": 1, "size": "medium", "max_level": 1, "category": "items",
//!       "prerequisites": ["economy", "-total_nodes_unlocked:2"] }
//!   ]
//! }
//! ```
//!
//! Validation is all-or-nothing: a config either passes every check or is
//! rejected before anything is applied.

use crate::cost::{unlock_cost, NodeSize};
use crate::error::{Result, TreeError};
use crate::modifier::ModifierConfig;
use crate::node::NodeKind;
use crate::prerequisite::{DynamicPrerequisite, Prerequisite};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// A full tree definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<NodeConfig>,
}

/// A single node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub description: String,
    /// 0 = foundation, higher = later in the tree
    pub tier: u32,
    pub size: NodeSize,
    pub max_level: u32,
    pub category: String,
    /// Static keys and dynamic conditions, AND semantics
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub sort_order: i32,
    /// Unlocked at level 1 on sync, skipping the vote
    #[serde(default)]
    pub auto_unlock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier_config: Option<ModifierConfig>,
}

impl NodeConfig {
    /// Per-level unlock cost.
    pub fn unlock_cost(&self) -> u64 {
        unlock_cost(self.tier, self.size)
    }

    /// Split prerequisites into static keys and dynamic conditions.
    pub fn parsed_prerequisites(&self) -> Result<(Vec<String>, Vec<DynamicPrerequisite>)> {
        let mut keys = Vec::new();
        let mut dynamic = Vec::new();
        for raw in &self.prerequisites {
            match raw.parse::<Prerequisite>()? {
                Prerequisite::Static(key) => keys.push(key),
                Prerequisite::Dynamic(d) => dynamic.push(d),
            }
        }
        Ok((keys, dynamic))
    }

    fn check_fields(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(TreeError::InvalidConfig("node key is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(TreeError::InvalidConfig(format!("node {} has no name", self.key)));
        }
        if self.category.trim().is_empty() {
            return Err(TreeError::InvalidConfig(format!("node {} has no category", self.key)));
        }
        if self.max_level == 0 {
            return Err(TreeError::InvalidConfig(format!(
                "node {} max_level must be >= 1",
                self.key
            )));
        }
        Ok(())
    }
}

/// DFS node color.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl TreeConfig {
    /// Load a tree from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Parse a tree from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Stable content fingerprint (blake3 hex) used for change detection.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Look up a node definition by key.
    pub fn node(&self, key: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.key == key)
    }

    /// Validate fields, key uniqueness, prerequisite references and acyclicity.
    pub fn validate(&self) -> Result<()> {
        let mut edges: HashMap<&str, Vec<String>> = HashMap::with_capacity(self.nodes.len());

        for node in &self.nodes {
            node.check_fields()?;
            let (keys, _dynamic) = node.parsed_prerequisites()?;
            if edges.insert(node.key.as_str(), keys).is_some() {
                return Err(TreeError::DuplicateKey(node.key.clone()));
            }
        }

        for (node, prereqs) in &edges {
            for prereq in prereqs {
                if !edges.contains_key(prereq.as_str()) {
                    return Err(TreeError::MissingPrerequisite {
                        node: node.to_string(),
                        prerequisite: prereq.clone(),
                    });
                }
            }
        }

        let mut colors: HashMap<&str, Color> =
            edges.keys().map(|&k| (k, Color::White)).collect();
        // Visit in config order so the reported cycle node is deterministic
        for node in &self.nodes {
            if colors.get(node.key.as_str()) == Some(&Color::White) {
                visit(node.key.as_str(), &edges, &mut colors)?;
            }
        }

        Ok(())
    }

    /// Keys of nodes flagged for auto-unlock.
    pub fn auto_unlock_keys(&self) -> HashSet<&str> {
        self.nodes
            .iter()
            .filter(|n| n.auto_unlock)
            .map(|n| n.key.as_str())
            .collect()
    }
}

fn visit<'a>(
    key: &'a str,
    edges: &'a HashMap<&'a str, Vec<String>>,
    colors: &mut HashMap<&'a str, Color>,
) -> Result<()> {
    colors.insert(key, Color::Gray);
    if let Some(prereqs) = edges.get(key) {
        for prereq in prereqs {
            match colors.get(prereq.as_str()).copied() {
                Some(Color::Gray) => return Err(TreeError::CycleDetected(prereq.clone())),
                Some(Color::White) => visit(prereq.as_str(), edges, colors)?,
                _ => {}
            }
        }
    }
    colors.insert(key, Color::Black);
    Ok(())
}
