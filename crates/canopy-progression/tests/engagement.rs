//! Engagement scoring integration tests
//!
//! Covers:
//! - metric weights from defaults and the store
//! - the progression_rate modifier and the contribution boost
//! - item feature checks
//! - velocity and unlock estimates from recorded history

mod common;

use canopy_progression::model::EngagementMetric;
use canopy_progression::{Confidence, Trend};
use chrono::{Duration as ChronoDuration, Utc};
use common::{harness, node};
use serde_json::json;

fn rate_upgrade() -> serde_json::Value {
    json!({
        "key": "rate_up",
        "name": "Faster Progress",
        "type": "upgrade",
        "tier": 0,
        "size": "small",
        "max_level": 2,
        "category": "upgrades",
        "modifier_config": {
            "feature_key": "progression_rate",
            "modifier_type": "multiplicative",
            "base_value": 1.0,
            "per_level_value": 0.5
        }
    })
}

#[tokio::test]
async fn default_weights_scale_points() {
    let h = harness(vec![node("a", 0, &[])]).await;

    let cases = [("message", 10, 10), ("command", 5, 10), ("item_used", 3, 4), ("unknown", 7, 7)];
    for (metric, value, expected) in cases {
        let points = h.service.record_engagement("user-1", metric, value).await.unwrap();
        assert_eq!(points, expected, "{} x{}", metric, value);
    }
    assert_eq!(h.service.get_engagement_score().await.unwrap(), 31);
    assert_eq!(h.accumulated().await, 31);
}

#[tokio::test]
async fn stored_weights_override_defaults() {
    let h = harness(vec![node("a", 0, &[])]).await;
    h.store.set_engagement_weight("message", 4.0).await;

    let points = h.service.record_engagement("user-1", "message", 3).await.unwrap();
    assert_eq!(points, 12);
}

#[tokio::test]
async fn progression_rate_modifier_follows_level() {
    let h = harness(vec![node("a", 0, &[]), rate_upgrade()]).await;

    let base = h.service.record_engagement("user-1", "command", 5).await.unwrap();
    assert_eq!(base, 10);

    h.service.admin_unlock("rate_up", 1).await.unwrap();
    let level_one = h.service.record_engagement("user-1", "command", 5).await.unwrap();
    assert_eq!(level_one, 15);

    h.service.admin_unlock("rate_up", 2).await.unwrap();
    let level_two = h.service.record_engagement("user-1", "command", 5).await.unwrap();
    assert_eq!(level_two, 20);

    let engagement = h.service.get_user_engagement("user-1").await.unwrap();
    assert_eq!(engagement.total_points, 45);
    assert_eq!(engagement.by_metric.get("command"), Some(&15));
}

#[tokio::test]
async fn boost_applies_once_unlocked() {
    let h = harness(vec![node("a", 0, &[]), node("upgrade_contribution_boost", 0, &[])]).await;

    h.service.add_contribution(100).await.unwrap();
    assert_eq!(h.accumulated().await, 100);

    h.service
        .admin_unlock("upgrade_contribution_boost", 1)
        .await
        .unwrap();
    h.service.add_contribution(100).await.unwrap();
    assert_eq!(h.accumulated().await, 250);
}

#[tokio::test]
async fn item_checks_use_item_keys() {
    let mut lootbox = node("item_lootbox", 0, &[]);
    lootbox["type"] = json!("item");
    let h = harness(vec![lootbox, node("a", 0, &[])]).await;

    assert!(!h.service.is_item_unlocked("lootbox").await.unwrap());
    h.service.admin_unlock("item_lootbox", 1).await.unwrap();

    let checks = h
        .service
        .are_items_unlocked(&["lootbox", "missing"])
        .await
        .unwrap();
    assert_eq!(checks.get("lootbox"), Some(&true));
    assert_eq!(checks.get("missing"), Some(&false));
}

#[tokio::test]
async fn velocity_and_estimate_from_history() {
    let h = harness(vec![node("a", 0, &[])]).await;
    let now = Utc::now();
    for days_ago in 0..7i64 {
        let points = if days_ago >= 4 { 10 } else { 30 };
        h.store
            .backfill_engagement(EngagementMetric {
                user_id: "user-1".into(),
                metric_type: "message".into(),
                value: points,
                points,
                recorded_at: now - ChronoDuration::days(days_ago),
            })
            .await;
    }

    let velocity = h.service.get_engagement_velocity(0).await.unwrap();
    assert_eq!(velocity.days, 7);
    assert_eq!(velocity.total, 150);
    assert_eq!(velocity.samples, 7);
    assert_eq!(velocity.trend, Trend::Increasing);

    let estimate = h.service.estimate_unlock_time("a").await.unwrap();
    assert_eq!(estimate.remaining, 500);
    assert_eq!(estimate.confidence, Confidence::High);
    let days = estimate.estimated_days.expect("velocity is positive");
    assert!((days - 500.0 / (150.0 / 7.0)).abs() < 1e-6);
}

#[tokio::test]
async fn estimate_without_history_has_no_eta() {
    let h = harness(vec![node("a", 0, &[])]).await;
    let estimate = h.service.estimate_unlock_time("a").await.unwrap();
    assert!(estimate.estimated_days.is_none());
    assert_eq!(estimate.confidence, Confidence::Low);
}
