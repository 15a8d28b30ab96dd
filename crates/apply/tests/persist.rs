use std::sync::Arc;

use async_trait::async_trait;
use converge_apply::{PersistOutcome, Persister};
use converge_core::{ConvergeError, DesiredResource, Gvk, OwnerRef, ResourceKey, Result};
use converge_kubehub::memory::Op;
use converge_kubehub::{MemoryStore, ResourceStore};
use mockall::mock;
use serde_json::{json, Value as Json};

mock! {
    pub Calls {
        fn get(&self, key: &ResourceKey) -> Result<Option<Json>>;
        fn create(&self, key: &ResourceKey, body: &Json, field_manager: &str) -> Result<Json>;
        fn patch_merge(&self, key: &ResourceKey, patch: &Json, field_manager: &str) -> Result<Json>;
    }
}

/// Store whose reads and writes are answered by a `MockCalls`.
struct MockStore(MockCalls);

impl MockStore {
    fn new() -> Self {
        Self(MockCalls::new())
    }
}

#[async_trait]
impl ResourceStore for MockStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Json>> {
        self.0.get(key)
    }

    async fn create(&self, key: &ResourceKey, body: &Json, field_manager: &str) -> Result<Json> {
        self.0.create(key, body, field_manager)
    }

    async fn patch_merge(&self, key: &ResourceKey, patch: &Json, field_manager: &str) -> Result<Json> {
        self.0.patch_merge(key, patch, field_manager)
    }

    async fn list(&self, _gvk: &Gvk, _namespace: Option<&str>) -> Result<Vec<Json>> {
        Ok(Vec::new())
    }

    async fn update_status(&self, key: &ResourceKey, _object: &Json, _field_manager: &str) -> Result<Json> {
        Err(ConvergeError::Validation(format!("unexpected status write for {key}")))
    }
}

fn owner() -> OwnerRef {
    OwnerRef {
        gvk: Gvk::new("tenancy.converge.dev", "v1alpha1", "TenantNamespace"),
        namespace: None,
        name: "team-a".into(),
        uid: "owner-uid".into(),
    }
}

fn limit_range(cpu: &str) -> DesiredResource {
    DesiredResource::from_manifest(json!({
        "apiVersion": "v1",
        "kind": "LimitRange",
        "metadata": {"name": "team-a-limits", "namespace": "team-a"},
        "spec": {"limits": [{"type": "Container", "default": {"cpu": cpu}}]}
    }))
    .unwrap()
}

#[tokio::test]
async fn create_then_noop_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let p = Persister::new(store.clone()).with_field_manager("test");
    let desired = limit_range("250m");

    assert_eq!(p.create_or_update(&desired, &owner()).await.unwrap(), PersistOutcome::Created);
    let live = store.object(desired.key()).unwrap();
    assert_eq!(live["metadata"]["ownerReferences"][0]["uid"], "owner-uid");
    assert_eq!(live["metadata"]["ownerReferences"][0]["controller"], true);

    let writes = store.writes();
    assert_eq!(p.create_or_update(&desired, &owner()).await.unwrap(), PersistOutcome::Unchanged);
    assert_eq!(store.writes(), writes);
}

#[tokio::test]
async fn drift_is_patched_with_precondition() {
    let store = Arc::new(MemoryStore::new());
    let p = Persister::new(store.clone());
    p.create_or_update(&limit_range("250m"), &owner()).await.unwrap();

    let outcome = p.create_or_update(&limit_range("500m"), &owner()).await.unwrap();
    assert!(matches!(outcome, PersistOutcome::Updated(s) if s.updates == 1));
    let live = store.object(limit_range("500m").key()).unwrap();
    assert_eq!(live["spec"]["limits"][0]["default"]["cpu"], "500m");
    assert_eq!(live["metadata"]["generation"], 2);
}

#[tokio::test]
async fn fields_set_by_others_are_not_drift() {
    let store = Arc::new(MemoryStore::new());
    let p = Persister::new(store.clone());
    let desired = limit_range("250m");
    p.create_or_update(&desired, &owner()).await.unwrap();
    store
        .patch_merge(desired.key(), &json!({"metadata": {"annotations": {"seen-by": "auditor"}}}), "other")
        .await
        .unwrap();
    let patches = store.calls(Op::Patch);
    assert_eq!(p.create_or_update(&desired, &owner()).await.unwrap(), PersistOutcome::Unchanged);
    assert_eq!(store.calls(Op::Patch), patches);
}

#[tokio::test]
async fn canonicalized_quantities_are_not_drift() {
    let store = Arc::new(MemoryStore::new());
    let p = Persister::new(store.clone());
    let quota = DesiredResource::from_manifest(json!({
        "apiVersion": "v1",
        "kind": "ResourceQuota",
        "metadata": {"name": "tenant-resource-quota", "namespace": "team-a"},
        "spec": {"hard": {"limits.cpu": "2000m", "limits.memory": "4096Mi"}}
    }))
    .unwrap();
    p.create_or_update(&quota, &owner()).await.unwrap();
    // the API server stores quantities in canonical form
    store
        .patch_merge(quota.key(), &json!({"spec": {"hard": {"limits.cpu": "2", "limits.memory": "4Gi"}}}), "apiserver")
        .await
        .unwrap();

    let patches = store.calls(Op::Patch);
    assert_eq!(p.create_or_update(&quota, &owner()).await.unwrap(), PersistOutcome::Unchanged);
    assert_eq!(store.calls(Op::Patch), patches);
}

#[tokio::test]
async fn conflict_on_patch_is_tolerated() {
    let store = Arc::new(MemoryStore::new());
    let p = Persister::new(store.clone());
    p.create_or_update(&limit_range("250m"), &owner()).await.unwrap();
    store.fail_next(Op::Patch, ConvergeError::Conflict("object has been modified".into()));
    let outcome = p.create_or_update(&limit_range("1"), &owner()).await.unwrap();
    assert_eq!(outcome, PersistOutcome::Conflicted);
}

#[tokio::test]
async fn other_failures_propagate() {
    let store = Arc::new(MemoryStore::new());
    let p = Persister::new(store.clone());
    store.fail_next(Op::Create, ConvergeError::Transport("connection refused".into()));
    let err = p.create_or_update(&limit_range("250m"), &owner()).await.unwrap_err();
    assert!(matches!(err, ConvergeError::Transport(_)));

    store.fail_next(Op::Create, ConvergeError::AlreadyExists("race".into()));
    let err = p.create_or_update(&limit_range("250m"), &owner()).await.unwrap_err();
    assert!(err.is_already_exists());
}

#[tokio::test]
async fn namespace_on_cluster_scoped_desired_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    store.insert(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "team-a"}})).unwrap();
    let p = Persister::new(store.clone());
    let desired = DesiredResource::from_manifest(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": "team-a"}
    }))
    .unwrap();
    // first pass only adds the owner reference
    assert!(matches!(p.create_or_update(&desired, &owner()).await.unwrap(), PersistOutcome::Updated(_)));
    assert_eq!(p.create_or_update(&desired, &owner()).await.unwrap(), PersistOutcome::Unchanged);
}

#[tokio::test]
async fn immutable_kinds_are_never_patched() {
    let crd = DesiredResource::from_manifest(json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": "widgets.example.dev"},
        "spec": {"group": "example.dev", "scope": "Namespaced"}
    }))
    .unwrap();
    let live = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": "widgets.example.dev", "resourceVersion": "7"},
        "spec": {"group": "example.dev", "scope": "Cluster"}
    });

    let mut mock = MockStore::new();
    mock.0.expect_get().times(1).returning(move |_| Ok(Some(live.clone())));
    mock.0.expect_patch_merge().times(0);
    mock.0.expect_create().times(0);

    let p = Persister::new(Arc::new(mock));
    assert_eq!(p.create_or_update(&crd, &owner()).await.unwrap(), PersistOutcome::SkippedImmutable);
}

#[tokio::test]
async fn create_carries_field_manager() {
    let mut mock = MockStore::new();
    mock.0.expect_get().returning(|_| Ok(None));
    mock.0.expect_create()
        .withf(|_, body, fm| fm == "tenancy-controller" && body["metadata"]["ownerReferences"][0]["uid"] == "owner-uid")
        .times(1)
        .returning(|_, body, _| Ok(body.clone()));

    let p = Persister::new(Arc::new(mock)).with_field_manager("tenancy-controller");
    assert_eq!(p.create_or_update(&limit_range("250m"), &owner()).await.unwrap(), PersistOutcome::Created);
}
