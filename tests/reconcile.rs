//! End-to-end reconciliation against a scripted provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Call, STACK, ScriptedProvider, fast_config, manifest, reconciler};
use infragraph::error::{GraphError, InfragraphError, ProviderError, ReconcileError, StateError};
use infragraph::executor::{ActionOutcome, FailureKind};
use infragraph::model::ResourceKey;
use infragraph::planner::ActionKind;
use infragraph::provider::ProviderApi;
use infragraph::reconciler::{Reconciler, ensure_complete};
use infragraph::state::{MemoryStateStore, StateStore};
use tokio_util::sync::CancellationToken;

fn key(raw: &str) -> ResourceKey {
    raw.parse().unwrap()
}

fn memory() -> Arc<dyn StateStore> {
    Arc::new(MemoryStateStore::new())
}

#[tokio::test]
async fn test_fresh_apply_creates_in_dependency_order() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    let reconciler = reconciler(STACK, &provider, Arc::clone(&store));

    let result = reconciler.reconcile().await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.applied(), 4);

    let network = provider.position(&Call::Create("network.main".into()));
    let subnet = provider.position(&Call::Create("subnet.a".into()));
    let web = provider.position(&Call::Create("server.web".into()));
    let db = provider.position(&Call::Create("server.db".into()));
    assert!(network < subnet);
    assert!(subnet < web);
    assert!(subnet < db);

    let records = store.load().await.unwrap();
    assert_eq!(records.len(), 4);
    let subnet_record = &records[&key("subnet.a")];
    let network_record = &records[&key("network.main")];
    assert_eq!(
        subnet_record.attributes["network_id"],
        serde_json::json!(network_record.provider_id)
    );
    assert_eq!(subnet_record.dependencies, vec![key("network.main")]);
}

#[tokio::test]
async fn test_replan_after_apply_is_all_noop() {
    let provider = Arc::new(ScriptedProvider::new());
    let reconciler = reconciler(STACK, &provider, memory());
    reconciler.reconcile().await.unwrap();
    let calls = provider.calls().len();

    let plan = reconciler.plan().await.unwrap();
    assert!(!plan.has_changes());
    assert_eq!(plan.summary().unchanged, 4);
    assert!(plan.actions.iter().all(|a| a.kind == ActionKind::NoOp));

    let result = reconciler.apply(&plan).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.unchanged(), 4);
    assert_eq!(provider.calls().len(), calls);
}

#[tokio::test]
async fn test_plan_is_deterministic() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    let first = reconciler(STACK, &provider, Arc::clone(&store)).plan().await.unwrap();
    let second = reconciler(STACK, &provider, Arc::clone(&store)).plan().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_call() {
    let yaml = r#"
project:
  name: loop
types:
  node: {}
resources:
  - type: node
    name: a
    attributes:
      next: "${node.b.id}"
  - type: node
    name: b
    attributes:
      next: "${node.c.id}"
  - type: node
    name: c
    attributes:
      next: "${node.a.id}"
"#;
    let provider = Arc::new(ScriptedProvider::new());
    let api: Arc<dyn ProviderApi> = provider.clone();

    let err = Reconciler::from_manifest(&manifest(yaml), &api, memory()).unwrap_err();

    let InfragraphError::Graph(GraphError::CyclicDependency { cycle }) = &err else {
        panic!("expected a cycle error, got {err}");
    };
    for name in ["node.a", "node.b", "node.c"] {
        assert!(cycle.contains(&key(name)), "{name} missing from {cycle:?}");
    }
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_failure_skips_dependents_only() {
    let yaml = format!(
        "{STACK}
  - type: network
    name: edge
    attributes:
      label: network.edge
      cidr: 10.9.0.0/16
"
    );
    let provider = Arc::new(ScriptedProvider::new());
    provider.fail("subnet.a", [ProviderError::permanent("quota exceeded")]);
    let store = memory();
    let reconciler = reconciler(&yaml, &provider, Arc::clone(&store));

    let plan = reconciler.plan().await.unwrap();
    let result = reconciler.apply(&plan).await.unwrap();

    assert!(!result.is_success());
    assert_eq!(result.applied(), 2);
    assert_eq!(result.failed(), 1);
    assert_eq!(result.skipped(), 2);
    assert!(matches!(
        result.outcome_for(&key("subnet.a")),
        Some(ActionOutcome::Failed {
            kind: FailureKind::Permanent,
            ..
        })
    ));
    assert_eq!(
        result.outcome_for(&key("server.web")),
        Some(&ActionOutcome::Skipped {
            reason: String::from("dependency subnet.a failed")
        })
    );
    assert_eq!(result.outcome_for(&key("network.edge")), Some(&ActionOutcome::Applied));
    assert_eq!(provider.calls_for("server.web"), 0);
    assert_eq!(provider.calls_for("subnet.a"), 1);

    let records = store.load().await.unwrap();
    assert!(records.contains_key(&key("network.main")));
    assert!(!records.contains_key(&key("subnet.a")));

    let err = ensure_complete(&result).unwrap_err();
    assert!(matches!(
        err,
        InfragraphError::Reconcile(ReconcileError::ApplyIncomplete {
            failed: 1,
            skipped: 2
        })
    ));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.fail(
        "network.main",
        [
            ProviderError::transient("503 service unavailable"),
            ProviderError::rate_limited("429 too many requests", Duration::from_millis(2)),
        ],
    );
    let reconciler = reconciler(STACK, &provider, memory());

    let result = reconciler.reconcile().await.unwrap();

    let report = result
        .reports
        .iter()
        .find(|r| r.key == key("network.main"))
        .unwrap();
    assert_eq!(report.outcome, ActionOutcome::Applied);
    assert_eq!(report.attempts, 3);
    assert_eq!(provider.calls_for("network.main"), 3);
}

#[tokio::test]
async fn test_retries_stop_at_the_attempt_limit() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.fail(
        "network.main",
        (0..10).map(|i| ProviderError::transient(format!("flaky #{i}"))),
    );
    let reconciler = reconciler(STACK, &provider, memory());

    let plan = reconciler.plan().await.unwrap();
    let result = reconciler.apply(&plan).await.unwrap();

    let report = &result.reports[0];
    assert_eq!(report.key, key("network.main"));
    assert!(matches!(
        report.outcome,
        ActionOutcome::Failed {
            kind: FailureKind::Transient,
            ..
        }
    ));
    assert_eq!(report.attempts, 4);
    assert_eq!(result.skipped(), 3);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.fail("server.db", [ProviderError::unauthorized("bad token")]);
    let reconciler = reconciler(STACK, &provider, memory());

    let plan = reconciler.plan().await.unwrap();
    let result = reconciler.apply(&plan).await.unwrap();

    assert_eq!(provider.calls_for("server.db"), 1);
    assert!(matches!(
        result.outcome_for(&key("server.db")),
        Some(ActionOutcome::Failed {
            kind: FailureKind::Unauthorized,
            ..
        })
    ));
    assert_eq!(result.applied(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_call_times_out() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.hang("network.main");
    let mut config = fast_config(4);
    config.action_timeout = Duration::from_secs(1);
    config.retry = config.retry.with_max_attempts(2);
    let reconciler = reconciler(STACK, &provider, memory()).with_config(config);

    let plan = reconciler.plan().await.unwrap();
    let result = reconciler.apply(&plan).await.unwrap();

    let report = &result.reports[0];
    assert!(matches!(
        report.outcome,
        ActionOutcome::Failed {
            kind: FailureKind::Transient,
            ..
        }
    ));
    assert_eq!(report.attempts, 2);
    assert_eq!(result.skipped(), 3);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let mut yaml = String::from("project:\n  name: wide\ntypes:\n  bucket: {}\nresources:\n");
    for i in 0..8 {
        yaml.push_str(&format!(
            "  - type: bucket\n    name: b{i}\n    attributes:\n      label: bucket.b{i}\n"
        ));
    }
    let provider = Arc::new(ScriptedProvider::with_delay(Duration::from_millis(20)));
    let reconciler = reconciler(&yaml, &provider, memory()).with_config(fast_config(3));

    let result = reconciler.reconcile().await.unwrap();

    assert_eq!(result.applied(), 8);
    assert!(provider.peak_concurrency() <= 3);
    assert!(provider.peak_concurrency() > 1);
}

#[tokio::test]
async fn test_cancelled_apply_starts_nothing() {
    let provider = Arc::new(ScriptedProvider::new());
    let cancel = CancellationToken::new();
    let store = memory();
    let reconciler =
        reconciler(STACK, &provider, Arc::clone(&store)).with_cancellation(cancel.clone());

    let plan = reconciler.plan().await.unwrap();
    cancel.cancel();
    let result = reconciler.apply(&plan).await.unwrap();

    assert!(result.cancelled);
    assert!(!result.is_success());
    assert_eq!(result.skipped(), 4);
    assert!(result.reports.iter().all(|r| r.outcome
        == ActionOutcome::Skipped {
            reason: String::from("cancelled")
        }));
    assert!(provider.calls().is_empty());
    assert!(!store.is_locked().await.unwrap());
}

#[tokio::test]
async fn test_run_lock_is_released_and_respected() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    let reconciler = reconciler(STACK, &provider, Arc::clone(&store));

    let plan = reconciler.plan().await.unwrap();
    let result = reconciler.apply(&plan).await.unwrap();
    assert!(result.is_success());
    assert!(!store.is_locked().await.unwrap());

    let lock = store.acquire_lock("someone-else").await.unwrap();
    let pending = reconciler.plan_destroy().await.unwrap();
    let err = reconciler.apply(&pending).await.unwrap_err();
    assert!(matches!(
        err,
        InfragraphError::State(StateError::LockedByOther { .. })
    ));
    assert!(provider.calls().iter().all(|c| matches!(c, Call::Create(_))));

    store.release_lock(&lock.lock_id).await.unwrap();
}

#[tokio::test]
async fn test_destroy_deletes_users_first() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    let reconciler = reconciler(STACK, &provider, Arc::clone(&store));
    reconciler.reconcile().await.unwrap();

    let plan = reconciler.plan_destroy().await.unwrap();
    assert_eq!(plan.summary().delete, 4);
    let result = reconciler.apply(&plan).await.unwrap();
    ensure_complete(&result).unwrap();

    let network = provider.position(&Call::Delete("network.main".into()));
    let subnet = provider.position(&Call::Delete("subnet.a".into()));
    let web = provider.position(&Call::Delete("server.web".into()));
    let db = provider.position(&Call::Delete("server.db".into()));
    assert!(web < subnet);
    assert!(db < subnet);
    assert!(subnet < network);

    assert!(store.load().await.unwrap().is_empty());
    assert!(provider.live().is_empty());
}

#[tokio::test]
async fn test_removed_resource_is_deleted_after_its_users() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    reconciler(STACK, &provider, Arc::clone(&store))
        .reconcile()
        .await
        .unwrap();

    // The servers move to a new subnet and subnet.a goes away.
    let moved = STACK
        .replace("name: a\n", "name: b\n")
        .replace("label: subnet.a", "label: subnet.b")
        .replace("${subnet.a.id}", "${subnet.b.id}");
    let reconciler = reconciler(&moved, &provider, Arc::clone(&store));

    let plan = reconciler.plan().await.unwrap();
    let summary = plan.summary();
    assert_eq!(summary.create, 1);
    assert_eq!(summary.update, 2);
    assert_eq!(summary.delete, 1);

    reconciler.reconcile().await.unwrap();

    let create = provider.position(&Call::Create("subnet.b".into()));
    let web = provider.position(&Call::Update("server.web".into()));
    let db = provider.position(&Call::Update("server.db".into()));
    let delete = provider.position(&Call::Delete("subnet.a".into()));
    assert!(create < web && create < db);
    assert!(web < delete && db < delete);
    assert_eq!(
        provider.live(),
        vec!["network.main", "server.db", "server.web", "subnet.b"]
    );
}

#[tokio::test]
async fn test_force_new_change_replaces_and_updates_dependents() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    reconciler(STACK, &provider, Arc::clone(&store))
        .reconcile()
        .await
        .unwrap();
    let before = store.get(&key("subnet.a")).await.unwrap().unwrap();

    let changed = STACK.replace("10.0.1.0/24", "10.0.2.0/24");
    let reconciler = reconciler(&changed, &provider, Arc::clone(&store));

    let plan = reconciler.plan().await.unwrap();
    let summary = plan.summary();
    assert_eq!(summary.replace, 1);
    assert_eq!(summary.update, 2);
    assert_eq!(summary.unchanged, 1);
    assert!(
        plan.actions
            .iter()
            .filter(|a| a.key == key("subnet.a"))
            .all(|a| a.replacement)
    );

    reconciler.apply(&plan).await.unwrap();

    let delete = provider.position(&Call::Delete("subnet.a".into()));
    let create = provider
        .calls()
        .iter()
        .rposition(|c| *c == Call::Create("subnet.a".into()))
        .unwrap();
    let web = provider.position(&Call::Update("server.web".into()));
    assert!(delete < create);
    assert!(create < web);

    let after = store.get(&key("subnet.a")).await.unwrap().unwrap();
    assert_ne!(after.provider_id, before.provider_id);
    let web_record = store.get(&key("server.web")).await.unwrap().unwrap();
    assert_eq!(
        web_record.attributes["subnet_id"],
        serde_json::json!(after.provider_id)
    );
    assert!(!reconciler.plan().await.unwrap().has_changes());
}

#[tokio::test]
async fn test_stale_plan_does_not_duplicate_resources() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    let first = reconciler(STACK, &provider, Arc::clone(&store));
    let second = reconciler(STACK, &provider, Arc::clone(&store));

    let first_plan = first.plan().await.unwrap();
    let second_plan = second.plan().await.unwrap();
    assert_eq!(second_plan.summary().create, 4);

    assert!(first.apply(&first_plan).await.unwrap().is_success());
    let result = second.apply(&second_plan).await.unwrap();

    assert!(!result.is_success());
    let Some(ActionOutcome::Failed { kind, cause }) = result.outcome_for(&key("network.main"))
    else {
        panic!("network.main should have failed");
    };
    assert_eq!(*kind, FailureKind::State);
    assert!(cause.contains("state changed since plan"));
    assert_eq!(result.skipped(), 3);

    assert_eq!(provider.calls_for("network.main"), 1);
    assert_eq!(provider.live().len(), 4);
    assert_eq!(store.load().await.unwrap().len(), 4);
    assert!(!store.is_locked().await.unwrap());
}

#[tokio::test]
async fn test_update_fails_when_record_moved_after_planning() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    reconciler(STACK, &provider, Arc::clone(&store))
        .reconcile()
        .await
        .unwrap();

    let changed = STACK.replace("10.0.0.0/16", "10.1.0.0/16");
    let reconciler = reconciler(&changed, &provider, Arc::clone(&store));
    let plan = reconciler.plan().await.unwrap();
    assert_eq!(plan.summary().update, 1);

    let mut moved = store.get(&key("network.main")).await.unwrap().unwrap();
    moved.provider_id = String::from("network-999");
    store.save(&key("network.main"), &moved).await.unwrap();

    let result = reconciler.apply(&plan).await.unwrap();

    assert!(matches!(
        result.outcome_for(&key("network.main")),
        Some(ActionOutcome::Failed {
            kind: FailureKind::State,
            ..
        })
    ));
    assert!(!provider.calls().contains(&Call::Update("network.main".into())));
    let stored = store.get(&key("network.main")).await.unwrap().unwrap();
    assert_eq!(stored.provider_id, "network-999");
}

#[tokio::test]
async fn test_reconcile_refuses_to_plan_while_locked() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = memory();
    let reconciler = reconciler(STACK, &provider, Arc::clone(&store));
    let lock = store.acquire_lock("someone-else").await.unwrap();

    let err = reconciler.reconcile().await.unwrap_err();

    assert!(matches!(
        err,
        InfragraphError::State(StateError::LockedByOther { .. })
    ));
    assert!(provider.calls().is_empty());
    assert!(store.load().await.unwrap().is_empty());
    store.release_lock(&lock.lock_id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_lets_in_flight_call_finish() {
    let provider = Arc::new(ScriptedProvider::with_delay(Duration::from_millis(200)));
    let cancel = CancellationToken::new();
    let store = memory();
    let reconciler =
        reconciler(STACK, &provider, Arc::clone(&store)).with_cancellation(cancel.clone());
    let plan = reconciler.plan().await.unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let result = reconciler.apply(&plan).await.unwrap();

    assert!(result.cancelled);
    assert_eq!(
        result.outcome_for(&key("network.main")),
        Some(&ActionOutcome::Applied)
    );
    for name in ["subnet.a", "server.web", "server.db"] {
        assert_eq!(
            result.outcome_for(&key(name)),
            Some(&ActionOutcome::Skipped {
                reason: String::from("cancelled")
            }),
            "{name}"
        );
    }
    let records = store.load().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records.contains_key(&key("network.main")));
    assert_eq!(provider.calls(), vec![Call::Create("network.main".into())]);
}
