//! Full runs against the file-backed provider and state store.

use std::path::Path;
use std::sync::Arc;

use infragraph::config::{ConfigParser, ConfigValidator};
use infragraph::provider::{LocalProvider, ProviderApi};
use infragraph::reconciler::Reconciler;
use infragraph::state::{LocalStateStore, StateStore};
use tempfile::TempDir;

const TEMPLATE: &str = include_str!("../templates/infragraph.yaml");

fn json_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map_or(0, |entries| {
        entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count()
    })
}

fn local_reconciler(dir: &TempDir) -> (Reconciler, Arc<dyn StateStore>, usize) {
    let manifest_path = dir.path().join("infragraph.yaml");
    std::fs::write(&manifest_path, TEMPLATE).unwrap();

    let manifest = ConfigParser::new().load_file(&manifest_path).unwrap();
    ConfigValidator::new().validate(&manifest).unwrap();

    let api: Arc<dyn ProviderApi> = Arc::new(LocalProvider::new(dir.path().join("provider")));
    let store: Arc<dyn StateStore> =
        Arc::new(LocalStateStore::with_base_dir(dir.path().join("state")));
    let reconciler = Reconciler::from_manifest(&manifest, &api, Arc::clone(&store)).unwrap();
    (reconciler, store, manifest.resources.len())
}

#[tokio::test]
async fn test_template_converges_and_destroys() {
    let dir = TempDir::new().unwrap();
    let (reconciler, store, declared) = local_reconciler(&dir);
    let provider_dir = dir.path().join("provider");

    let result = reconciler.reconcile().await.unwrap();
    assert_eq!(result.applied(), declared);
    assert_eq!(json_files(&provider_dir), declared);
    assert_eq!(store.load().await.unwrap().len(), declared);
    assert!(!store.is_locked().await.unwrap());

    let replan = reconciler.plan().await.unwrap();
    assert!(!replan.has_changes());

    let destroy = reconciler.plan_destroy().await.unwrap();
    assert_eq!(destroy.summary().delete, declared);
    let result = reconciler.apply(&destroy).await.unwrap();
    assert!(result.is_success());
    assert_eq!(json_files(&provider_dir), 0);
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_state_survives_a_new_process() {
    let dir = TempDir::new().unwrap();
    let (first, _, declared) = local_reconciler(&dir);
    first.reconcile().await.unwrap();

    let (second, _, _) = local_reconciler(&dir);
    let plan = second.plan().await.unwrap();

    assert!(!plan.has_changes());
    assert_eq!(plan.summary().unchanged, declared);
}
