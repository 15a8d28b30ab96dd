use std::sync::Arc;
use std::time::Duration;

use converge_core::{Gvk, PhaseState, ResourceKey};
use converge_kubehub::{MemoryStore, ResourceStore};
use converge_readiness::ReadinessRegistry;
use converge_reconcile::{owner_key, ReconcileOutcome, Reconciler};
use converge_tenancy::{tenant_hooks, TenancyDefaults, TenantNamespace, TenantNamespaceSpec};
use serde_json::json;

fn seed(store: &MemoryStore, ns: &str) -> ResourceKey {
    let owner = TenantNamespace::new(ns, TenantNamespaceSpec { namespace: ns.into(), resources: Default::default() });
    store.insert(serde_json::to_value(&owner).unwrap()).unwrap();
    owner_key(&owner)
}

fn reconciler(store: &Arc<MemoryStore>, wait_for_namespace: bool) -> Reconciler<TenantNamespace> {
    let shared: Arc<dyn ResourceStore> = store.clone();
    let hooks = tenant_hooks(TenancyDefaults::default(), wait_for_namespace, shared.clone(), ReadinessRegistry::with_defaults());
    Reconciler::builder(shared, hooks).field_manager("converge-tenancy").build()
}

fn ns_key(ns: &str) -> ResourceKey {
    ResourceKey::new(&Gvk::new("", "v1", "Namespace"), None, ns)
}

fn status(store: &MemoryStore, key: &ResourceKey) -> converge_core::OwnerStatus {
    serde_json::from_value(store.object(key).unwrap()["status"].clone()).unwrap()
}

#[tokio::test]
async fn tenant_converges_once_namespace_is_active() {
    let store = Arc::new(MemoryStore::new());
    let owner = seed(&store, "team-a");
    let r = reconciler(&store, false);

    assert_eq!(r.reconcile_key(&owner).await.unwrap(), ReconcileOutcome::RequeueAfter(Duration::from_secs(5)));
    // owner plus four children
    assert_eq!(store.len(), 5);
    let quota_key = ResourceKey::new(&Gvk::new("", "v1", "ResourceQuota"), Some("team-a"), "tenant-resource-quota");
    assert_eq!(store.object(&quota_key).unwrap()["spec"]["hard"]["limits.cpu"], "2000m");

    store.set_status(&ns_key("team-a"), json!({"phase": "Active"})).unwrap();
    assert_eq!(r.reconcile_key(&owner).await.unwrap(), ReconcileOutcome::Done);
    let st = status(&store, &owner);
    assert!(st.ready);
    assert_eq!(st.resources.len(), 4);
}

#[tokio::test]
async fn namespace_gate_holds_children_until_active() {
    let store = Arc::new(MemoryStore::new());
    let owner = seed(&store, "team-b");
    let r = reconciler(&store, true);

    assert_eq!(r.reconcile_key(&owner).await.unwrap(), ReconcileOutcome::RequeueAfter(Duration::from_secs(10)));
    assert_eq!(store.len(), 2);
    let st = status(&store, &owner);
    assert_eq!(st.phase_condition("CreateResources").unwrap().state, PhaseState::Pending);
    assert_eq!(st.resources[1].last_resource_phase, "WaitForResource");

    store.set_status(&ns_key("team-b"), json!({"phase": "Active"})).unwrap();
    assert_eq!(r.reconcile_key(&owner).await.unwrap(), ReconcileOutcome::Done);
    assert_eq!(store.len(), 5);
    assert!(status(&store, &owner).ready);
}
