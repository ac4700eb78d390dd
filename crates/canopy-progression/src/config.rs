//! Engine configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Tunables for the progression engine.
///
/// Constructed once and injected into the service; nothing reads
/// process-wide state after construction.
#[derive(Debug, Clone)]
pub struct ProgressionConfig {
    /// Options shown in a public vote
    pub max_voting_options: usize,

    /// Cap on contribution excess carried into the next cycle
    pub max_rollover: u64,

    /// Switch to the atomic path once the estimated remaining cost is within
    /// `amount × atomic_threshold_multiplier`
    pub atomic_threshold_multiplier: u64,

    /// Node whose unlock boosts every contribution
    pub contribution_boost_key: String,

    /// Boost as a ratio, applied with integer math
    pub contribution_boost_numerator: u64,
    pub contribution_boost_denominator: u64,

    /// Modifier feature applied to engagement scores
    pub progression_rate_key: String,

    /// Fallback weights when the store has none for a metric type
    pub default_weights: HashMap<String, f64>,

    /// Metric recorded when a user votes
    pub vote_metric: String,

    pub weight_cache_ttl: Duration,

    pub modifier_cache_ttl: Duration,

    /// Upper bound on any single background task
    pub task_timeout: Duration,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        let default_weights = [
            ("message", 1.0),
            ("command", 2.0),
            ("item_crafted", 3.0),
            ("item_used", 1.5),
            ("vote_cast", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            max_voting_options: 4,
            max_rollover: 200,
            atomic_threshold_multiplier: 5,
            contribution_boost_key: "upgrade_contribution_boost".to_string(),
            contribution_boost_numerator: 3,
            contribution_boost_denominator: 2,
            progression_rate_key: "progression_rate".to_string(),
            default_weights,
            vote_metric: "vote_cast".to_string(),
            weight_cache_ttl: Duration::from_secs(5 * 60),
            modifier_cache_ttl: Duration::from_secs(30 * 60),
            task_timeout: Duration::from_secs(60),
        }
    }
}

impl ProgressionConfig {
    /// Defaults overridden by `CANOPY_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("CANOPY_MAX_VOTING_OPTIONS") {
            config.max_voting_options = v;
        }
        if let Some(v) = env_parse("CANOPY_MAX_ROLLOVER") {
            config.max_rollover = v;
        }
        if let Some(v) = env_parse("CANOPY_ATOMIC_THRESHOLD_MULTIPLIER") {
            config.atomic_threshold_multiplier = v;
        }
        if let Ok(v) = std::env::var("CANOPY_CONTRIBUTION_BOOST_KEY") {
            config.contribution_boost_key = v;
        }
        if let Some(secs) = env_parse("CANOPY_WEIGHT_CACHE_TTL_SECS") {
            config.weight_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("CANOPY_MODIFIER_CACHE_TTL_SECS") {
            config.modifier_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("CANOPY_TASK_TIMEOUT_SECS") {
            config.task_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Apply the contribution boost to an amount.
    pub fn boosted(&self, amount: u64) -> u64 {
        if self.contribution_boost_denominator == 0 {
            return amount;
        }
        amount * self.contribution_boost_numerator / self.contribution_boost_denominator
    }

    /// Fallback weight for a metric type (1.0 when unknown).
    pub fn default_weight(&self, metric_type: &str) -> f64 {
        self.default_weights.get(metric_type).copied().unwrap_or(1.0)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
