//! Level-scaled modifiers carried by upgrade nodes.

use serde::{Deserialize, Serialize};

/// How a modifier combines with the value it modifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierType {
    Multiplicative,
    Additive,
}

/// Modifier attached to a node.
///
/// At level `n` the modifier's strength is `base_value + per_level_value × n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierConfig {
    /// Feature whose value this modifies (e.g. `progression_rate`)
    pub feature_key: String,
    pub modifier_type: ModifierType,
    pub base_value: f64,
    pub per_level_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
}

impl ModifierConfig {
    /// Modifier strength at a level.
    pub fn strength(&self, level: u32) -> f64 {
        self.base_value + self.per_level_value * level as f64
    }

    /// Apply this modifier at `level` to `value`, clamping to the configured bounds.
    pub fn apply(&self, value: f64, level: u32) -> f64 {
        let strength = self.strength(level);
        let modified = match self.modifier_type {
            ModifierType::Multiplicative => value * strength,
            ModifierType::Additive => value + strength,
        };
        self.clamp(modified)
    }

    fn clamp(&self, value: f64) -> f64 {
        let value = match self.max_value {
            Some(max) if value > max => max,
            _ => value,
        };
        match self.min_value {
            Some(min) if value < min => min,
            _ => value,
        }
    }
}
