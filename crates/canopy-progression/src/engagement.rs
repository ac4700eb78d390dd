//! Engagement scoring, modifiers and velocity.
//!
//! Every engagement event is weighted by metric type, scaled by the
//! `progression_rate` modifier and fed into the current unlock progress as
//! whole contribution points.

use crate::error::{Error, Result};
use crate::model::{ContributorScore, EngagementMetric, UserEngagement};
use crate::service::ProgressionService;
use canopy_tree::ModifierConfig;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Window used when a velocity query asks for zero days.
pub const DEFAULT_VELOCITY_DAYS: u32 = 7;

/// Direction of daily contributions across a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Contribution rate over a window of days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityMetrics {
    pub days: u32,
    pub total: u64,
    pub average_per_day: f64,
    pub trend: Trend,
    /// Days in the window with any contribution
    pub samples: usize,
    /// Oldest first, one entry per day
    pub daily: Vec<u64>,
}

impl VelocityMetrics {
    /// Build from per-day totals, oldest first.
    pub fn from_daily(daily: Vec<u64>) -> Self {
        let days = daily.len() as u32;
        let total: u64 = daily.iter().sum();
        let average_per_day = if days == 0 {
            0.0
        } else {
            total as f64 / days as f64
        };
        let (first, second) = daily.split_at(daily.len() / 2);
        Self {
            days,
            total,
            average_per_day,
            trend: trend(first, second),
            samples: daily.iter().filter(|d| **d > 0).count(),
            daily,
        }
    }
}

fn average(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

fn trend(first: &[u64], second: &[u64]) -> Trend {
    let (before, after) = (average(first), average(second));
    if after > before * 1.1 {
        Trend::Increasing
    } else if after < before * 0.9 {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// How much an estimate can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn assess(samples: usize, trend: Trend) -> Self {
        match samples {
            n if n >= 7 && trend != Trend::Decreasing => Confidence::High,
            n if n >= 3 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// Projected time to unlock a node at the current velocity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockEstimate {
    pub node_key: String,
    pub remaining: u64,
    pub average_per_day: f64,
    /// None while nothing is being contributed
    pub estimated_days: Option<f64>,
    pub confidence: Confidence,
}

impl ProgressionService {
    /// Record an engagement event and contribute its points.
    ///
    /// Returns the points contributed.
    pub async fn record_engagement(&self, user_id: &str, metric_type: &str, value: u64) -> Result<u64> {
        let weight = self.engagement_weight(metric_type).await;
        let base = value as f64 * weight;
        let rate_key = self.config().progression_rate_key.clone();
        let score = self.get_modified_value(&rate_key, base).await?;
        let points = if score.is_finite() && score > 0.0 {
            score.floor() as u64
        } else {
            0
        };

        self.store()
            .record_engagement(EngagementMetric {
                user_id: user_id.to_string(),
                metric_type: metric_type.to_string(),
                value,
                points,
                recorded_at: Utc::now(),
            })
            .await?;
        debug!(user_id, metric_type, value, weight, points, "engagement recorded");

        if points > 0 {
            self.add_contribution(points).await?;
        }
        Ok(points)
    }

    /// Weight of a metric type: cache, then store, then configured default.
    pub async fn engagement_weight(&self, metric_type: &str) -> f64 {
        let key = metric_type.to_string();
        if let Some(weight) = self.caches().weights.get(&key) {
            return weight;
        }
        let stored = match self.store().engagement_weights().await {
            Ok(weights) => weights,
            Err(e) => {
                warn!(metric_type, error = %e, "engagement weights unavailable, using default");
                return self.config().default_weight(metric_type);
            }
        };
        let weight = stored
            .get(metric_type)
            .copied()
            .unwrap_or_else(|| self.config().default_weight(metric_type));
        self.caches().weights.insert(key, weight);
        weight
    }

    /// Apply every unlocked modifier for `feature_key` to `base`, in tree order.
    pub async fn get_modified_value(&self, feature_key: &str, base: f64) -> Result<f64> {
        let modifiers = self.active_modifiers(feature_key).await?;
        Ok(modifiers
            .iter()
            .fold(base, |value, (modifier, level)| modifier.apply(value, *level)))
    }

    async fn active_modifiers(&self, feature_key: &str) -> Result<Vec<(ModifierConfig, u32)>> {
        let key = feature_key.to_string();
        if let Some(cached) = self.caches().modifiers.get(&key) {
            return Ok(cached);
        }
        let snapshot = self.snapshot().await?;
        let modifiers: Vec<(ModifierConfig, u32)> = snapshot
            .nodes()
            .iter()
            .filter_map(|node| {
                let modifier = node.modifier.as_ref()?;
                let level = snapshot.level(node.id);
                (modifier.feature_key == feature_key && level > 0).then(|| (modifier.clone(), level))
            })
            .collect();
        self.caches().modifiers.insert(key, modifiers.clone());
        Ok(modifiers)
    }

    /// Total contribution points ever recorded.
    pub async fn get_engagement_score(&self) -> Result<u64> {
        self.store().engagement_score().await
    }

    pub async fn get_user_engagement(&self, user_id: &str) -> Result<UserEngagement> {
        self.store().user_engagement(user_id).await
    }

    pub async fn get_contribution_leaderboard(&self, limit: usize) -> Result<Vec<ContributorScore>> {
        self.store().contribution_leaderboard(limit).await
    }

    /// Daily contribution rate over the last `days` days (0 means a week).
    pub async fn get_engagement_velocity(&self, days: u32) -> Result<VelocityMetrics> {
        let days = if days == 0 { DEFAULT_VELOCITY_DAYS } else { days };
        let today = Utc::now().date_naive();
        let first_day = today - ChronoDuration::days(days as i64 - 1);
        let since = first_day
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .ok_or_else(|| Error::Store(format!("invalid window start {}", first_day)))?;

        let totals = self.store().daily_contributions(since).await?;
        let daily = first_day
            .iter_days()
            .take(days as usize)
            .map(|day| totals.get(&day).copied().unwrap_or(0))
            .collect();
        Ok(VelocityMetrics::from_daily(daily))
    }

    /// Estimate how long `node_key` will take to unlock at the weekly rate.
    pub async fn estimate_unlock_time(&self, node_key: &str) -> Result<UnlockEstimate> {
        let node = self
            .store()
            .node_by_key(node_key)
            .await?
            .ok_or_else(|| Error::NodeNotFound(node_key.to_string()))?;

        let remaining = match self.store().active_progress().await? {
            Some(p) if p.node_id == Some(node.id) => {
                node.unlock_cost.saturating_sub(p.contributions_accumulated)
            }
            _ => node.unlock_cost,
        };

        let velocity = self.get_engagement_velocity(DEFAULT_VELOCITY_DAYS).await?;
        let estimated_days =
            (velocity.average_per_day > 0.0).then(|| remaining as f64 / velocity.average_per_day);

        Ok(UnlockEstimate {
            node_key: node.key,
            remaining,
            average_per_day: velocity.average_per_day,
            estimated_days,
            confidence: Confidence::assess(velocity.samples, velocity.trend),
        })
    }
}
