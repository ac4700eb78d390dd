//! Node kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key prefix shared by every item node.
pub const ITEM_KEY_PREFIX: &str = "item_";

/// What a node gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A command or capability
    Feature,
    /// A usable item, keyed `item_<name>`
    Item,
    /// A levelled modifier (see [`crate::ModifierConfig`])
    Upgrade,
    /// A game mechanic
    Mechanic,
}

impl NodeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeKind::Feature => "feature",
            NodeKind::Item => "item",
            NodeKind::Upgrade => "upgrade",
            NodeKind::Mechanic => "mechanic",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node key for an item name (`"money"` → `"item_money"`).
pub fn item_key(item_name: &str) -> String {
    format!("{}{}", ITEM_KEY_PREFIX, item_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_keys_are_prefixed() {
        assert_eq!(item_key("lootbox"), "item_lootbox");
    }

    #[test]
    fn kinds_serialize_lowercase() {
        let json = serde_json::to_string(&NodeKind::Upgrade).unwrap();
        assert_eq!(json, "\"upgrade\"");
        let kind: NodeKind = serde_json::from_str("\"mechanic\"").unwrap();
        assert_eq!(kind, NodeKind::Mechanic);
    }
}
