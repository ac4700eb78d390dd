//! Node configuration, boot and shutdown.

use crate::admin_socket::{default_socket_path, AdminSocket};
use crate::error::Result;
use canopy_progression::{
    MemoryIdentity, MemoryStore, ProgressionConfig, ProgressionEvent, ProgressionService,
};
use canopy_tree::TreeConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Tree definition (JSON)
    pub tree_path: PathBuf,

    /// Admin socket path (for canopy-admin)
    pub admin_socket: PathBuf,

    /// How long background work may finish after Ctrl-C
    pub shutdown_grace: Duration,

    /// Engine tunables
    pub progression: ProgressionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(
            std::env::var("CANOPY_DATA_DIR").unwrap_or_else(|_| "./canopy-data".to_string()),
        );

        let tree_path = std::env::var("CANOPY_TREE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("tree.json"));

        let admin_socket = default_socket_path();

        let shutdown_grace = match std::env::var("CANOPY_SHUTDOWN_GRACE_SECS") {
            Ok(raw) => raw.parse().map(Duration::from_secs).unwrap_or_else(|_| {
                warn!(value = %raw, "invalid CANOPY_SHUTDOWN_GRACE_SECS, using 10s");
                Duration::from_secs(10)
            }),
            Err(_) => Duration::from_secs(10),
        };

        Self {
            tree_path,
            admin_socket,
            shutdown_grace,
            progression: ProgressionConfig::from_env(),
        }
    }
}

/// A running progression daemon.
pub struct CanopyNode {
    config: NodeConfig,
    service: ProgressionService,
}

impl CanopyNode {
    /// Load and sync the tree, then restore progression state.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let tree = TreeConfig::load(&config.tree_path)?;
        let service = ProgressionService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryIdentity::new()),
            config.progression.clone(),
        );

        let config_name = config.tree_path.display().to_string();
        let report = service.sync_tree(&tree, &config_name).await?;
        info!(
            tree = %config_name,
            version = %tree.version,
            nodes = tree.nodes.len(),
            inserted = report.inserted,
            auto_unlocked = report.auto_unlocked,
            "Loaded unlock tree"
        );

        service.initialize_progression_state().await?;
        Ok(Self { config, service })
    }

    pub fn service(&self) -> &ProgressionService {
        &self.service
    }

    /// Serve the admin socket until Ctrl-C, then shut down.
    pub async fn run(self) -> Result<()> {
        let events = tokio::spawn(log_events(self.service.events().receiver()));
        let socket = AdminSocket::new(self.service.clone(), &self.config.admin_socket);

        tokio::select! {
            result = socket.run() => result?,
            _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        }

        events.abort();
        if let Err(e) = self.service.shutdown(self.config.shutdown_grace).await {
            warn!(error = %e, "Background work did not finish in time");
        }
        let _ = std::fs::remove_file(&self.config.admin_socket);
        info!("Canopy node stopped");
        Ok(())
    }
}

/// Announce progression events in the node log.
async fn log_events(mut rx: broadcast::Receiver<ProgressionEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(event = %json, "progression event"),
                Err(e) => warn!(error = %e, "unserializable progression event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TREE: &str = r#"{
        "version": "1.0",
        "description": "boot test",
        "nodes": [
            { "key": "root", "name": "Root", "type": "feature", "tier": 0,
              "size": "small", "max_level": 1, "category": "core", "auto_unlock": true },
            { "key": "economy", "name": "Economy", "type": "feature", "tier": 1,
              "size": "medium", "max_level": 1, "category": "economy",
              "prerequisites": ["root"] },
            { "key": "item_lootbox", "name": "Lootbox", "type": "item", "tier": 1,
              "size": "small", "max_level": 1, "category": "items",
              "prerequisites": ["root"] }
        ]
    }"#;

    fn config(dir: &std::path::Path) -> NodeConfig {
        NodeConfig {
            tree_path: dir.join("tree.json"),
            admin_socket: dir.join("admin.sock"),
            shutdown_grace: Duration::from_secs(1),
            progression: ProgressionConfig::default(),
        }
    }

    #[tokio::test]
    async fn boot_syncs_tree_and_sets_target() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::File::create(&config.tree_path)
            .unwrap()
            .write_all(TREE.as_bytes())
            .unwrap();

        let node = CanopyNode::new(config).await.unwrap();
        let service = node.service();

        assert!(service.is_feature_unlocked("root").await.unwrap());
        let status = service.get_progression_status().await.unwrap();
        let target = status.target.expect("boot should pick a target");
        assert!(target.node_key == "economy" || target.node_key == "item_lootbox");
    }

    #[tokio::test]
    async fn missing_tree_fails_boot() {
        let dir = tempfile::tempdir().unwrap();
        let result = CanopyNode::new(config(dir.path())).await;
        assert!(matches!(result, Err(crate::Error::Tree(_))));
    }
}
