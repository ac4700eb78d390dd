//! Tree config sync integration tests

mod common;

use canopy_progression::{
    Error, IdentityProvider, MemoryIdentity, MemoryStore, ProgressionConfig, ProgressionService,
    ProgressionStore,
};
use canopy_tree::TreeError;
use common::{node, tree};
use serde_json::json;
use std::sync::Arc;

fn service() -> (ProgressionService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let identity: Arc<dyn IdentityProvider> = Arc::new(MemoryIdentity::new());
    let service = ProgressionService::new(store.clone(), identity, ProgressionConfig::default());
    (service, store)
}

#[tokio::test]
async fn first_sync_inserts_and_auto_unlocks() {
    let (service, store) = service();
    let mut root = node("root", 0, &[]);
    root["auto_unlock"] = json!(true);
    let config = tree(vec![root, node("a", 1, &["root"]), node("b", 2, &["a", "-total_nodes_unlocked:2"])]);

    let report = service.sync_tree(&config, "tree.json").await.unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.auto_unlocked, 1);
    assert!(!report.unchanged);

    assert!(service.is_feature_unlocked("root").await.unwrap());
    let b = store.node_by_key("b").await.unwrap().unwrap();
    assert_eq!(b.dynamic_prerequisites.len(), 1);
    let prereqs = store.prerequisites(b.id).await.unwrap();
    assert_eq!(prereqs.len(), 1);
    assert_eq!(prereqs[0].key, "a");

    let meta = store.sync_metadata("tree.json").await.unwrap().unwrap();
    assert_eq!(meta.node_count, 3);
    assert_eq!(meta.fingerprint, config.fingerprint().unwrap());
}

#[tokio::test]
async fn unchanged_config_is_skipped() {
    let (service, _) = service();
    let config = tree(vec![node("a", 0, &[]), node("b", 1, &["a"])]);

    service.sync_tree(&config, "tree.json").await.unwrap();
    let report = service.sync_tree(&config, "tree.json").await.unwrap();
    assert!(report.unchanged);
    assert_eq!(report.inserted + report.updated + report.skipped, 0);
}

#[tokio::test]
async fn changed_nodes_are_updated_in_place() {
    let (service, store) = service();
    service
        .sync_tree(&tree(vec![node("a", 0, &[]), node("b", 1, &["a"])]), "tree.json")
        .await
        .unwrap();
    let before = store.node_by_key("a").await.unwrap().unwrap();

    let mut renamed = node("a", 0, &[]);
    renamed["name"] = json!("Alpha");
    let report = service
        .sync_tree(&tree(vec![renamed, node("b", 1, &["a"])]), "tree.json")
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.inserted, 0);

    let after = store.node_by_key("a").await.unwrap().unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.display_name, "Alpha");
}

#[tokio::test]
async fn invalid_config_applies_nothing() {
    let (service, store) = service();
    service
        .sync_tree(&tree(vec![node("a", 0, &[]), node("b", 1, &["a"])]), "tree.json")
        .await
        .unwrap();

    let cyclic = tree(vec![node("a", 0, &["b"]), node("b", 1, &["a"]), node("c", 0, &[])]);
    let err = service.sync_tree(&cyclic, "tree.json").await.unwrap_err();
    assert!(matches!(err, Error::Tree(TreeError::CycleDetected(_))), "got {:?}", err);

    assert!(store.node_by_key("c").await.unwrap().is_none());
    let a = store.node_by_key("a").await.unwrap().unwrap();
    assert!(store.prerequisites(a.id).await.unwrap().is_empty());
}
