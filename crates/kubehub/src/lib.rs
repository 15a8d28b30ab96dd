//! Converge kubehub – persistence transport for owner and child objects.
//!
//! [`ResourceStore`] is the narrow capability the engine needs from the cluster:
//! read one object by identity, create, merge-patch, list and write the status
//! subresource. [`KubeStore`] implements it over `Api<DynamicObject>`; the
//! `memory` feature adds an in-process implementation for tests.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use converge_core::{ConvergeError, Gvk, ResourceKey, Result};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[cfg(any(test, feature = "memory"))]
pub mod memory;

#[cfg(any(test, feature = "memory"))]
pub use memory::MemoryStore;

/// Read/write access to live objects, addressed by identity.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the live object. `Ok(None)` means the object does not exist.
    async fn get(&self, key: &ResourceKey) -> Result<Option<Json>>;

    /// Create `body`; fails with [`ConvergeError::AlreadyExists`] when the object exists.
    async fn create(&self, key: &ResourceKey, body: &Json, field_manager: &str) -> Result<Json>;

    /// Apply a JSON merge patch. A `metadata.resourceVersion` in the patch acts
    /// as an optimistic-lock precondition.
    async fn patch_merge(&self, key: &ResourceKey, patch: &Json, field_manager: &str) -> Result<Json>;

    async fn list(&self, gvk: &Gvk, namespace: Option<&str>) -> Result<Vec<Json>>;

    /// Replace the status subresource of `object` (which must carry its resourceVersion).
    async fn update_status(&self, key: &ResourceKey, object: &Json, field_manager: &str) -> Result<Json>;
}

/// Translate a kube client error into the engine's error taxonomy.
pub fn map_kube_error(key: &ResourceKey, err: kube::Error) -> ConvergeError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => ConvergeError::NotFound(format!("{}: {}", key, ae.message)),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            ConvergeError::AlreadyExists(format!("{}: {}", key, ae.message))
        }
        kube::Error::Api(ae) if ae.code == 409 => ConvergeError::Conflict(format!("{}: {}", key, ae.message)),
        kube::Error::Api(ae) => ConvergeError::Api { code: ae.code, reason: ae.reason, message: ae.message },
        other => ConvergeError::Transport(other.to_string()),
    }
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn to_json(obj: &DynamicObject) -> Result<Json> {
    let mut raw = serde_json::to_value(obj)?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

/// [`ResourceStore`] backed by the Kubernetes API server.
pub struct KubeStore {
    client: Client,
    resources: RwLock<FxHashMap<Gvk, (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, resources: RwLock::new(FxHashMap::default()) }
    }

    /// Build a store from the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| ConvergeError::Transport(e.to_string()))?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    async fn resolve(&self, gvk: &Gvk) -> Result<(ApiResource, bool)> {
        if let Some(hit) = self.resources.read().await.get(gvk) {
            return Ok(hit.clone());
        }
        let found = find_api_resource(self.client.clone(), gvk).await?;
        debug!(gvk = %gvk, namespaced = found.1, "resolved api resource");
        self.resources.write().await.insert(gvk.clone(), found.clone());
        Ok(found)
    }

    async fn api_for(&self, gvk: &Gvk, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (ar, namespaced) = self.resolve(gvk).await?;
        let api = if namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
                None => return Err(ConvergeError::Validation(format!("namespace required for namespaced kind {}", gvk))),
            }
        } else {
            Api::all_with(self.client.clone(), &ar)
        };
        Ok(api)
    }

    async fn list_api(&self, gvk: &Gvk, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (ar, namespaced) = self.resolve(gvk).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Json>> {
        let api = self.api_for(&key.gvk(), key.namespace()).await?;
        match api.get_opt(&key.name).await.map_err(|e| map_kube_error(key, e))? {
            Some(obj) => Ok(Some(to_json(&obj)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, key: &ResourceKey, body: &Json, field_manager: &str) -> Result<Json> {
        let api = self.api_for(&key.gvk(), key.namespace()).await?;
        let obj: DynamicObject = serde_json::from_value(body.clone())?;
        let pp = PostParams { dry_run: false, field_manager: Some(field_manager.to_string()) };
        let created = api.create(&pp, &obj).await.map_err(|e| map_kube_error(key, e))?;
        info!(resource = %key, "created");
        to_json(&created)
    }

    async fn patch_merge(&self, key: &ResourceKey, patch: &Json, field_manager: &str) -> Result<Json> {
        let api = self.api_for(&key.gvk(), key.namespace()).await?;
        let mut pp = PatchParams::default();
        pp.field_manager = Some(field_manager.to_string());
        let patched = api.patch(&key.name, &pp, &Patch::Merge(patch)).await.map_err(|e| map_kube_error(key, e))?;
        info!(resource = %key, "patched");
        to_json(&patched)
    }

    async fn list(&self, gvk: &Gvk, namespace: Option<&str>) -> Result<Vec<Json>> {
        let api = self.list_api(gvk, namespace).await?;
        let probe = ResourceKey::new(gvk, namespace, "*");
        let items = api.list(&ListParams::default()).await.map_err(|e| map_kube_error(&probe, e))?;
        items.items.iter().map(to_json).collect()
    }

    async fn update_status(&self, key: &ResourceKey, object: &Json, field_manager: &str) -> Result<Json> {
        let api = self.api_for(&key.gvk(), key.namespace()).await?;
        let pp = PostParams { dry_run: false, field_manager: Some(field_manager.to_string()) };
        let data = serde_json::to_vec(object)?;
        let updated = api.replace_status(&key.name, &pp, data).await.map_err(|e| map_kube_error(key, e))?;
        debug!(resource = %key, "status replaced");
        to_json(&updated)
    }
}

async fn find_api_resource(client: Client, gvk: &Gvk) -> Result<(ApiResource, bool)> {
    let want = GroupVersionKind { group: gvk.group.clone(), version: gvk.version.clone(), kind: gvk.kind.clone() };
    let discovery = Discovery::new(client)
        .filter(&[want.group.as_str()])
        .run()
        .await
        .map_err(|e| ConvergeError::Transport(format!("discovery failed: {}", e)))?;
    for group in discovery.groups() {
        for (ar, caps) in group.versioned_resources(&want.version) {
            if ar.kind == want.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar, namespaced));
            }
        }
    }
    Err(ConvergeError::Validation(format!("GVK not served: {}", gvk)))
}
