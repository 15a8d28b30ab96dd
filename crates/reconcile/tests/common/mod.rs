#![allow(dead_code)]

use std::sync::Arc;

use chrono::TimeZone;
use converge_core::{DesiredResource, FixedClock, OwnerStatus, ResourceKey, Result};
use converge_kubehub::MemoryStore;
use converge_reconcile::{owner_key, Owner};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[kube(group = "test.converge.dev", version = "v1", kind = "Workspace", status = "OwnerStatus", schema = "disabled")]
pub struct WorkspaceSpec {
    pub namespace: String,
    #[serde(default)]
    pub cpu: Option<String>,
}

impl Owner for Workspace {
    fn owner_status(&self) -> Option<&OwnerStatus> {
        self.status.as_ref()
    }
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap()))
}

/// Seed a Workspace owner and return its identity.
pub fn seed_owner(store: &MemoryStore, name: &str, namespace: &str) -> ResourceKey {
    let owner = Workspace::new(name, WorkspaceSpec { namespace: namespace.into(), cpu: None });
    let key = owner_key(&owner);
    store.insert(serde_json::to_value(&owner).unwrap()).unwrap();
    key
}

pub fn owner_status(store: &MemoryStore, key: &ResourceKey) -> OwnerStatus {
    let obj = store.object(key).unwrap();
    serde_json::from_value(obj["status"].clone()).unwrap_or_default()
}

/// Namespace plus a LimitRange inside it.
pub fn generate(owner: &Workspace) -> Result<Vec<DesiredResource>> {
    let ns = &owner.spec.namespace;
    let cpu = owner.spec.cpu.clone().unwrap_or_else(|| "250m".into());
    Ok(vec![
        DesiredResource::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": ns}
        }))?,
        DesiredResource::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "LimitRange",
            "metadata": {"name": format!("{}-limits", ns), "namespace": ns},
            "spec": {"limits": [{"type": "Container", "default": {"cpu": cpu}}]}
        }))?,
    ])
}
