//! End-to-end restore runs against in-memory collaborators

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use lattice_common::crd::{LabelSelector, LatticeRestoreSpec, RestorePhase, Toggle};
use lattice_common::retry::RetryConfig;
use lattice_common::{RESTORE_NAME_LABEL, SOURCE_NAMESPACE_ANNOTATION};
use lattice_restore::{
    ApplyError, ApplyOutcome, BackupCatalog, BackupItem, CatalogError, EngineConfig,
    MessageSink, ObjectApplier, ResourcePriorities, RestoreEngine, RestoreItem,
    RestoreLifecycle, RestoreRef, Severity, VolumeRestoreError, VolumeRestorer,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct InMemoryCatalog {
    backups: HashMap<String, Vec<BackupItem>>,
    schedules: HashMap<String, String>,
}

impl InMemoryCatalog {
    fn with_backup(mut self, name: &str, items: Vec<BackupItem>) -> Self {
        self.backups.insert(name.to_string(), items);
        self
    }

    fn with_schedule(mut self, schedule: &str, backup: &str) -> Self {
        self.schedules.insert(schedule.to_string(), backup.to_string());
        self
    }
}

#[async_trait]
impl BackupCatalog for InMemoryCatalog {
    async fn latest_successful_backup(
        &self,
        schedule: &str,
    ) -> Result<Option<String>, CatalogError> {
        Ok(self.schedules.get(schedule).cloned())
    }

    async fn load_items(&self, backup: &str) -> Result<Vec<BackupItem>, CatalogError> {
        self.backups
            .get(backup)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(backup.to_string()))
    }
}

/// Records every object it is asked to create, in call order
#[derive(Default)]
struct RecordingApplier {
    failing: HashSet<String>,
    existing: HashSet<String>,
    forbidden: HashSet<String>,
    applied: Mutex<Vec<String>>,
    manifests: Mutex<HashMap<String, Value>>,
    ensured: Mutex<Vec<String>>,
}

impl RecordingApplier {
    fn failing(items: &[&str]) -> Self {
        Self {
            failing: items.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    fn manifest(&self, display: &str) -> Value {
        self.manifests
            .lock()
            .get(display)
            .cloned()
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
impl ObjectApplier for RecordingApplier {
    async fn apply_object(
        &self,
        restore: &RestoreRef,
        item: &RestoreItem,
    ) -> Result<ApplyOutcome, ApplyError> {
        let display = item.display();
        if self.forbidden.contains(&display) {
            return Err(ApplyError::Structural(format!("forbidden: {}", display)));
        }
        if self.failing.contains(&display) {
            return Err(ApplyError::Item(format!("{}: admission webhook denied", display)));
        }
        if self.existing.contains(&display) {
            return Ok(ApplyOutcome::Warning(format!("{} already exists", display)));
        }

        self.manifests
            .lock()
            .insert(display.clone(), item.manifest(&restore.name));
        self.applied.lock().push(display);
        Ok(ApplyOutcome::Applied)
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), ApplyError> {
        self.ensured.lock().push(name.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FakeVolumes {
    failing: HashMap<String, VolumeRestoreError>,
    restored: Mutex<Vec<String>>,
}

#[async_trait]
impl VolumeRestorer for FakeVolumes {
    async fn restore_volume(&self, claim: &ObjectReference) -> Result<(), VolumeRestoreError> {
        let name = claim.name.clone().unwrap_or_default();
        if let Some(err) = self.failing.get(&name) {
            return Err(err.clone());
        }
        self.restored.lock().push(name);
        Ok(())
    }
}

#[derive(Default)]
struct CollectingSink {
    messages: Mutex<Vec<(Severity, String)>>,
}

#[async_trait]
impl MessageSink for CollectingSink {
    async fn record(&self, _restore: &RestoreRef, severity: Severity, text: String) {
        self.messages.lock().push((severity, text));
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn object(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> BackupItem {
    labelled(api_version, kind, namespace, name, &[])
}

fn labelled(
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
    name: &str,
    labels: &[(&str, &str)],
) -> BackupItem {
    let mut metadata = json!({
        "name": name,
        "uid": format!("uid-{}", name),
        "resourceVersion": "42",
        "labels": labels.iter().map(|(k, v)| (k.to_string(), json!(v))).collect::<serde_json::Map<_, _>>(),
    });
    if let Some(ns) = namespace {
        metadata["namespace"] = json!(ns);
    }
    BackupItem::from_manifest(json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": metadata,
        "status": {"phase": "Bound"},
    }))
    .unwrap()
}

/// A small application backup spread over two namespaces
fn shop_backup() -> Vec<BackupItem> {
    vec![
        object("v1", "ConfigMap", Some("shop"), "settings"),
        object("apps/v1", "Deployment", Some("shop"), "web"),
        object("v1", "Namespace", None, "shop"),
        object("rbac.authorization.k8s.io/v1", "ClusterRole", None, "shop-reader"),
        object("v1", "Secret", Some("billing"), "stripe"),
        object("v1", "Namespace", None, "billing"),
        object("v1", "Node", None, "worker-1"),
    ]
}

struct Harness {
    engine: RestoreEngine,
    applier: Arc<RecordingApplier>,
    volumes: Arc<FakeVolumes>,
    sink: Arc<CollectingSink>,
}

impl Harness {
    fn new(catalog: InMemoryCatalog, applier: RecordingApplier) -> Self {
        Self::with_volumes(catalog, applier, FakeVolumes::default(), EngineConfig::default())
    }

    fn with_volumes(
        catalog: InMemoryCatalog,
        applier: RecordingApplier,
        volumes: FakeVolumes,
        config: EngineConfig,
    ) -> Self {
        let applier = Arc::new(applier);
        let volumes = Arc::new(volumes);
        let sink = Arc::new(CollectingSink::default());
        let engine = RestoreEngine::new(
            Arc::new(catalog),
            applier.clone(),
            volumes.clone(),
            sink.clone(),
            config.with_catalog_retry(RetryConfig::no_retry()),
        );
        Self {
            engine,
            applier,
            volumes,
            sink,
        }
    }

    async fn run(&self, spec: LatticeRestoreSpec) -> (RestorePhase, RestoreLifecycle) {
        let lifecycle = RestoreLifecycle::new();
        let phase = self
            .engine
            .run(
                &RestoreRef::new("ops", "restore-1"),
                &spec,
                &lifecycle,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        (phase, lifecycle)
    }
}

fn position(order: &[String], display: &str) -> usize {
    order
        .iter()
        .position(|d| d == display)
        .unwrap_or_else(|| panic!("{} was not restored; order: {:?}", display, order))
}

// =============================================================================
// Selection
// =============================================================================

#[tokio::test]
async fn empty_filters_restore_everything_restorable() {
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        RecordingApplier::default(),
    );

    let (phase, lifecycle) = harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    assert_eq!(phase, RestorePhase::Completed);
    let mut applied = harness.applier.applied();
    applied.sort();
    assert_eq!(
        applied,
        vec![
            "clusterroles.rbac.authorization.k8s.io/shop-reader",
            "configmaps/shop/settings",
            "deployments.apps/shop/web",
            "namespaces/billing",
            "namespaces/shop",
            "secrets/billing/stripe",
        ]
    );
    let status = lifecycle.status();
    assert_eq!(status.errors, 0);
    assert_eq!(status.warnings, 0);
}

#[tokio::test]
async fn exclusion_overrides_inclusion() {
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        RecordingApplier::default(),
    );

    let spec = LatticeRestoreSpec {
        included_namespaces: vec!["shop".to_string(), "billing".to_string()],
        excluded_namespaces: vec!["billing".to_string()],
        included_resources: vec!["configmaps".to_string(), "secrets".to_string()],
        excluded_resources: vec!["configmaps".to_string()],
        include_cluster_resources: Toggle::Disabled,
        ..LatticeRestoreSpec::from_backup("nightly")
    };
    let (phase, _) = harness.run(spec).await;

    assert_eq!(phase, RestorePhase::Completed);
    assert!(harness.applier.applied().is_empty());
}

#[tokio::test]
async fn label_selector_narrows_selection() {
    let catalog = InMemoryCatalog::default().with_backup(
        "nightly",
        vec![
            labelled("v1", "ConfigMap", Some("shop"), "a", &[("tier", "frontend")]),
            labelled("v1", "ConfigMap", Some("shop"), "b", &[("tier", "backend")]),
            object("v1", "ConfigMap", Some("shop"), "c"),
        ],
    );
    let harness = Harness::new(catalog, RecordingApplier::default());

    let spec = LatticeRestoreSpec {
        label_selector: Some(LabelSelector::from_labels([("tier", "frontend")])),
        ..LatticeRestoreSpec::from_backup("nightly")
    };
    harness.run(spec).await;

    assert_eq!(harness.applier.applied(), vec!["configmaps/shop/a"]);
}

#[tokio::test]
async fn cluster_resources_disabled_restores_only_namespaced_items() {
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        RecordingApplier::default(),
    );

    let spec = LatticeRestoreSpec {
        include_cluster_resources: Toggle::Disabled,
        ..LatticeRestoreSpec::from_backup("nightly")
    };
    let (phase, _) = harness.run(spec).await;

    assert_eq!(phase, RestorePhase::Completed);
    let applied = harness.applier.applied();
    assert!(applied
        .iter()
        .all(|d| !d.starts_with("namespaces/") && !d.starts_with("clusterroles")));
    assert_eq!(applied.len(), 3);

    let mut ensured = harness.applier.ensured.lock().clone();
    ensured.sort();
    assert_eq!(ensured, vec!["billing", "shop"]);
}

// =============================================================================
// Rewrite and order
// =============================================================================

#[tokio::test]
async fn empty_mapping_keeps_namespaces() {
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        RecordingApplier::default(),
    );
    harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    let manifest = harness.applier.manifest("configmaps/shop/settings");
    assert_eq!(manifest["metadata"]["namespace"], "shop");
    assert!(manifest["metadata"]["annotations"]
        .get(SOURCE_NAMESPACE_ANNOTATION)
        .is_none());
}

#[tokio::test]
async fn mapped_namespace_is_rewritten_and_annotated() {
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        RecordingApplier::default(),
    );

    let spec = LatticeRestoreSpec {
        namespace_mapping: BTreeMap::from([("shop".to_string(), "shop-dr".to_string())]),
        ..LatticeRestoreSpec::from_backup("nightly")
    };
    harness.run(spec).await;

    let order = harness.applier.applied();
    assert!(order.contains(&"namespaces/shop-dr".to_string()));
    assert!(!order.iter().any(|d| d.contains("/shop/")));

    let manifest = harness.applier.manifest("deployments.apps/shop-dr/web");
    assert_eq!(manifest["metadata"]["namespace"], "shop-dr");
    assert_eq!(
        manifest["metadata"]["annotations"][SOURCE_NAMESPACE_ANNOTATION],
        "shop"
    );
    assert_eq!(manifest["metadata"]["labels"][RESTORE_NAME_LABEL], "restore-1");
    assert!(manifest["metadata"].get("uid").is_none());
    assert!(manifest["metadata"].get("resourceVersion").is_none());
    assert!(manifest.get("status").is_none());
}

#[tokio::test]
async fn namespaces_precede_their_contents() {
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        RecordingApplier::default(),
    );
    harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    let order = harness.applier.applied();
    let shop = position(&order, "namespaces/shop");
    let billing = position(&order, "namespaces/billing");
    assert!(shop < position(&order, "configmaps/shop/settings"));
    assert!(shop < position(&order, "deployments.apps/shop/web"));
    assert!(billing < position(&order, "secrets/billing/stripe"));
    assert!(position(&order, "clusterroles.rbac.authorization.k8s.io/shop-reader") < shop);
}

#[tokio::test]
async fn resource_priorities_order_within_namespace() {
    let harness = Harness::with_volumes(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        RecordingApplier::default(),
        FakeVolumes::default(),
        EngineConfig::default()
            .with_resource_priorities(ResourcePriorities::new(["deployments.apps"])),
    );
    harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    let order = harness.applier.applied();
    assert!(
        position(&order, "deployments.apps/shop/web")
            < position(&order, "configmaps/shop/settings")
    );
}

#[tokio::test]
async fn identical_inputs_yield_identical_order() {
    let mut orders = Vec::new();
    for _ in 0..2 {
        let harness = Harness::new(
            InMemoryCatalog::default().with_backup("nightly", shop_backup()),
            RecordingApplier::default(),
        );
        harness.run(LatticeRestoreSpec::from_backup("nightly")).await;
        orders.push(harness.applier.applied());
    }
    assert_eq!(orders[0], orders[1]);

    let harness = Harness::new(InMemoryCatalog::default(), RecordingApplier::default());
    let spec = LatticeRestoreSpec::from_backup("nightly");
    let first = harness.engine.plan(&spec, &shop_backup());
    let second = harness.engine.plan(&spec, &shop_backup());
    assert_eq!(first, second);
}

// =============================================================================
// Execution outcomes
// =============================================================================

#[tokio::test]
async fn third_of_five_failing_is_partial_failure() {
    let items: Vec<BackupItem> = (1..=5)
        .map(|i| object("v1", "ConfigMap", Some("shop"), &format!("item-{}", i)))
        .collect();
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", items),
        RecordingApplier::failing(&["configmaps/shop/item-3"]),
    );

    let (phase, lifecycle) = harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    assert_eq!(phase, RestorePhase::PartiallyFailed);
    assert_eq!(lifecycle.status().errors, 1);
    assert_eq!(
        harness.applier.applied(),
        vec![
            "configmaps/shop/item-1",
            "configmaps/shop/item-2",
            "configmaps/shop/item-4",
            "configmaps/shop/item-5",
        ]
    );

    let messages = harness.sink.messages.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, Severity::Error);
    assert!(messages[0].1.contains("configmaps/shop/item-3"));
}

#[tokio::test]
async fn existing_objects_are_warnings() {
    let applier = RecordingApplier {
        existing: HashSet::from(["configmaps/shop/settings".to_string()]),
        ..Default::default()
    };
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        applier,
    );

    let (phase, lifecycle) = harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    assert_eq!(phase, RestorePhase::Completed);
    assert_eq!(lifecycle.status().warnings, 1);
    assert_eq!(lifecycle.status().errors, 0);
}

#[tokio::test]
async fn structural_failure_fails_restore_with_partial_counts() {
    let applier = RecordingApplier {
        failing: HashSet::from(["configmaps/shop/settings".to_string()]),
        forbidden: HashSet::from(["deployments.apps/shop/web".to_string()]),
        ..Default::default()
    };
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        applier,
    );

    let (phase, lifecycle) = harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    assert_eq!(phase, RestorePhase::Failed);
    let status = lifecycle.status();
    assert_eq!(
        status.failure_reason.as_deref(),
        Some("forbidden: deployments.apps/shop/web")
    );
    assert_eq!(status.errors, 1);
    assert!(!harness
        .applier
        .applied()
        .contains(&"secrets/billing/stripe".to_string()));
}

#[tokio::test]
async fn missing_backup_fails_restore() {
    let harness = Harness::new(InMemoryCatalog::default(), RecordingApplier::default());

    let (phase, lifecycle) = harness.run(LatticeRestoreSpec::from_backup("gone")).await;

    assert_eq!(phase, RestorePhase::Failed);
    assert_eq!(
        lifecycle.status().failure_reason.as_deref(),
        Some("failed to load backup gone: backup gone not found")
    );
}

// =============================================================================
// Volumes
// =============================================================================

fn claims_backup() -> Vec<BackupItem> {
    vec![
        object("v1", "PersistentVolumeClaim", Some("db"), "data"),
        object("v1", "PersistentVolumeClaim", Some("db"), "wal"),
        object("v1", "PersistentVolumeClaim", Some("db"), "archive"),
        object("apps/v1", "StatefulSet", Some("db"), "postgres"),
    ]
}

#[tokio::test]
async fn volume_failures_are_item_errors() {
    let volumes = FakeVolumes {
        failing: HashMap::from([
            (
                "wal".to_string(),
                VolumeRestoreError::Restore("snapshot missing".to_string()),
            ),
            (
                "archive".to_string(),
                VolumeRestoreError::Verify("checksum mismatch".to_string()),
            ),
        ]),
        ..Default::default()
    };
    let harness = Harness::with_volumes(
        InMemoryCatalog::default().with_backup("nightly", claims_backup()),
        RecordingApplier::default(),
        volumes,
        EngineConfig::default(),
    );

    let (phase, lifecycle) = harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    assert_eq!(phase, RestorePhase::PartiallyFailed);
    let status = lifecycle.status();
    assert_eq!(status.errors, 2);
    assert_eq!(
        status.pod_volume_restore_errors[0].name.as_deref(),
        Some("wal")
    );
    assert_eq!(
        status.pod_volume_restore_verify_errors[0].name.as_deref(),
        Some("archive")
    );
    // The claim objects themselves were still created
    assert_eq!(harness.applier.applied().len(), 4);
    assert_eq!(*harness.volumes.restored.lock(), vec!["data".to_string()]);
}

#[tokio::test]
async fn volumes_not_restored_when_disabled() {
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", claims_backup()),
        RecordingApplier::default(),
    );

    let spec = LatticeRestoreSpec {
        restore_pvs: Toggle::Disabled,
        ..LatticeRestoreSpec::from_backup("nightly")
    };
    let (phase, _) = harness.run(spec).await;

    assert_eq!(phase, RestorePhase::Completed);
    assert!(harness.volumes.restored.lock().is_empty());
}

// =============================================================================
// Validation and lifecycle
// =============================================================================

#[tokio::test]
async fn missing_source_fails_validation() {
    let harness = Harness::new(InMemoryCatalog::default(), RecordingApplier::default());

    let (phase, lifecycle) = harness.run(LatticeRestoreSpec::default()).await;

    assert_eq!(phase, RestorePhase::FailedValidation);
    assert!(!lifecycle.status().validation_errors.is_empty());
    assert!(harness.applier.applied().is_empty());
}

#[tokio::test]
async fn schedule_restores_latest_backup() {
    let catalog = InMemoryCatalog::default()
        .with_backup("daily-20260205", shop_backup())
        .with_schedule("daily", "daily-20260205");
    let harness = Harness::new(catalog, RecordingApplier::default());

    let (phase, _) = harness.run(LatticeRestoreSpec::from_schedule("daily")).await;

    assert_eq!(phase, RestorePhase::Completed);
    assert!(!harness.applier.applied().is_empty());
}

#[tokio::test]
async fn parallel_namespaces_restore_the_same_set() {
    let mut items = Vec::new();
    for ns in ["a", "b", "c", "d"] {
        items.push(object("v1", "Namespace", None, ns));
        for i in 0..3 {
            items.push(object("v1", "ConfigMap", Some(ns), &format!("cm-{}", i)));
        }
    }
    let harness = Harness::with_volumes(
        InMemoryCatalog::default().with_backup("nightly", items),
        RecordingApplier::default(),
        FakeVolumes::default(),
        EngineConfig::default().with_max_parallel_namespaces(4),
    );

    let (phase, _) = harness.run(LatticeRestoreSpec::from_backup("nightly")).await;

    assert_eq!(phase, RestorePhase::Completed);
    let order = harness.applier.applied();
    assert_eq!(order.len(), 16);
    for ns in ["a", "b", "c", "d"] {
        let namespace = position(&order, &format!("namespaces/{}", ns));
        for i in 0..3 {
            assert!(namespace < position(&order, &format!("configmaps/{}/cm-{}", ns, i)));
        }
    }
}

#[tokio::test]
async fn lifecycle_admits_one_run() {
    let harness = Harness::new(
        InMemoryCatalog::default().with_backup("nightly", shop_backup()),
        RecordingApplier::default(),
    );
    let (_, lifecycle) = harness.run(LatticeRestoreSpec::from_backup("nightly")).await;
    let applied = harness.applier.applied().len();

    let again = harness
        .engine
        .run(
            &RestoreRef::new("ops", "restore-1"),
            &LatticeRestoreSpec::from_backup("nightly"),
            &lifecycle,
            &CancellationToken::new(),
        )
        .await;

    assert!(again.is_err());
    assert_eq!(harness.applier.applied().len(), applied);
    assert_eq!(lifecycle.phase(), RestorePhase::Completed);
}
