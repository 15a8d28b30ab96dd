use converge_core::{ConvergeError, Gvk, ResourceKey};
use converge_kubehub::memory::Op;
use converge_kubehub::MemoryStore;
use converge_readiness::ReadinessRegistry;
use serde_json::json;

fn ns_key(name: &str) -> ResourceKey {
    ResourceKey::new(&Gvk::new("", "v1", "Namespace"), None, name)
}

fn insert_namespace(store: &MemoryStore, name: &str, phase: &str) -> ResourceKey {
    store
        .insert(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": name},
            "status": {"phase": phase}
        }))
        .unwrap()
}

#[tokio::test]
async fn unregistered_kinds_are_ready_without_fetch() {
    let store = MemoryStore::new();
    let reg = ReadinessRegistry::with_defaults();
    let key = ResourceKey::new(&Gvk::new("", "v1", "LimitRange"), Some("team-a"), "limits");
    assert!(reg.is_ready(&store, &key).await.unwrap());
    assert_eq!(store.calls(Op::Get), 0);
}

#[tokio::test]
async fn absent_registered_kind_is_not_ready() {
    let store = MemoryStore::new();
    let reg = ReadinessRegistry::with_defaults();
    assert!(!reg.is_ready(&store, &ns_key("missing")).await.unwrap());
}

#[tokio::test]
async fn aggregate_readiness_short_circuits() {
    let store = MemoryStore::new();
    let reg = ReadinessRegistry::with_defaults();
    let ready = insert_namespace(&store, "a", "Active");
    let pending = insert_namespace(&store, "b", "Terminating");
    let third = insert_namespace(&store, "c", "Active");

    assert!(reg.are_ready(&store, std::iter::empty::<&ResourceKey>()).await.unwrap());
    assert!(reg.are_ready(&store, [&ready]).await.unwrap());

    let before = store.calls(Op::Get);
    assert!(!reg.are_ready(&store, [&ready, &pending, &third]).await.unwrap());
    assert_eq!(store.calls(Op::Get) - before, 2);
}

#[tokio::test]
async fn fetch_errors_propagate() {
    let store = MemoryStore::new();
    let reg = ReadinessRegistry::with_defaults();
    store.fail_next(Op::Get, ConvergeError::Transport("connection reset".into()));
    let err = reg.is_ready(&store, &ns_key("a")).await.unwrap_err();
    assert!(matches!(err, ConvergeError::Transport(_)));
}

#[tokio::test]
async fn expected_keys_apply_per_resource() {
    let store = MemoryStore::new();
    let key = store
        .insert(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "team-a"},
            "data": {"mode": ""}
        }))
        .unwrap();
    let mut reg = ReadinessRegistry::with_defaults();
    assert!(reg.is_ready(&store, &key).await.unwrap());
    reg.expect_keys(key.clone(), vec!["mode".into()]);
    assert!(!reg.is_ready(&store, &key).await.unwrap());
}

#[tokio::test]
async fn namespace_of_resource() {
    let store = MemoryStore::new();
    let reg = ReadinessRegistry::with_defaults();
    let child = ResourceKey::new(&Gvk::new("", "v1", "ResourceQuota"), Some("team-a"), "quota");
    assert!(!reg.namespace_ready(&store, &child).await.unwrap());
    insert_namespace(&store, "team-a", "Active");
    assert!(reg.namespace_ready(&store, &child).await.unwrap());
    assert!(reg.namespace_ready(&store, &ns_key("team-a")).await.unwrap());
}

#[tokio::test]
async fn custom_predicates_can_be_registered() {
    let store = MemoryStore::new();
    let key = store
        .insert(json!({
            "apiVersion": "example.dev/v1",
            "kind": "Widget",
            "metadata": {"name": "w"},
            "status": {"ok": false}
        }))
        .unwrap();
    let mut reg = ReadinessRegistry::new();
    reg.register("example.dev", "Widget", |live: &serde_json::Value, _: &[String]| -> converge_core::Result<bool> {
        Ok(live["status"]["ok"].as_bool().unwrap_or(false))
    });
    assert!(!reg.is_ready(&store, &key).await.unwrap());
    store.set_status(&key, json!({"ok": true})).unwrap();
    assert!(reg.is_ready(&store, &key).await.unwrap());
}
