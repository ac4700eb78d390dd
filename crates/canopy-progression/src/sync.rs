//! Applying a tree config to the store.

use crate::error::Result;
use crate::events::ProgressionEvent;
use crate::model::{NewNode, NodeId, SyncMetadata, UnlockSource};
use crate::service::ProgressionService;
use canopy_tree::{NodeConfig, TreeConfig};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// What a sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub auto_unlocked: usize,
    /// The stored fingerprint matched; nothing was applied
    pub unchanged: bool,
}

fn draft(config: &NodeConfig) -> Result<(NewNode, Vec<String>)> {
    let (keys, dynamic) = config.parsed_prerequisites()?;
    let node = NewNode {
        key: config.key.clone(),
        display_name: config.name.clone(),
        description: config.description.clone(),
        kind: config.kind,
        tier: config.tier,
        size: config.size,
        category: config.category.clone(),
        max_level: config.max_level,
        unlock_cost: config.unlock_cost(),
        sort_order: config.sort_order,
        auto_unlock: config.auto_unlock,
        dynamic_prerequisites: dynamic,
        modifier: config.modifier_config.clone(),
    };
    Ok((node, keys))
}

impl ProgressionService {
    /// Upsert the nodes of `config` by key and replace prerequisite edges.
    ///
    /// The whole config is validated before anything is written. A config
    /// whose fingerprint matches the last sync under `config_name` is skipped.
    pub async fn sync_tree(&self, config: &TreeConfig, config_name: &str) -> Result<SyncReport> {
        config.validate()?;
        let fingerprint = config.fingerprint()?;

        if let Some(meta) = self.store().sync_metadata(config_name).await? {
            if meta.fingerprint == fingerprint {
                debug!(config_name, "tree config unchanged, skipping sync");
                return Ok(SyncReport {
                    unchanged: true,
                    ..Default::default()
                });
            }
        }

        let drafts = config
            .nodes
            .iter()
            .map(draft)
            .collect::<Result<Vec<_>>>()?;

        let mut report = SyncReport::default();
        let mut ids: HashMap<String, NodeId> = HashMap::with_capacity(drafts.len());
        for (node, _) in &drafts {
            let id = match self.store().node_by_key(&node.key).await? {
                Some(existing) if node.matches(&existing) => {
                    report.skipped += 1;
                    existing.id
                }
                Some(existing) => {
                    self.store().update_node(existing.id, node.clone()).await?;
                    report.updated += 1;
                    existing.id
                }
                None => {
                    report.inserted += 1;
                    self.store().insert_node(node.clone()).await?
                }
            };
            ids.insert(node.key.clone(), id);
        }

        for (node, prerequisites) in &drafts {
            // Validation guarantees every key resolves
            let required = prerequisites
                .iter()
                .filter_map(|key| ids.get(key).copied())
                .collect();
            self.store().set_prerequisites(ids[&node.key], required).await?;
        }

        for (node, _) in drafts.iter().filter(|(n, _)| n.auto_unlock) {
            let id = ids[&node.key];
            if self.store().unlock(id, 1).await?.is_some() {
                continue;
            }
            self.store().unlock_node(id, 1, UnlockSource::Auto, 0).await?;
            self.publish(ProgressionEvent::NodeUnlocked {
                node_id: id,
                node_key: node.key.clone(),
                level: 1,
                source: UnlockSource::Auto,
            });
            report.auto_unlocked += 1;
        }

        self.store()
            .put_sync_metadata(SyncMetadata {
                config_name: config_name.to_string(),
                fingerprint,
                node_count: config.nodes.len(),
                synced_at: Utc::now(),
            })
            .await?;
        info!(
            config_name,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            auto_unlocked = report.auto_unlocked,
            "tree config synced"
        );
        Ok(report)
    }
}
