//! In-process [`ResourceStore`] with API-server-like bookkeeping.
//!
//! Objects get a uid and a monotonically increasing resourceVersion; `generation`
//! is bumped when anything outside metadata and status changes. A
//! `metadata.resourceVersion` carried by a patch or status write is checked as a
//! precondition. Calls are counted per operation and failures can be queued.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use converge_core::{ConvergeError, DesiredResource, Gvk, ResourceKey, Result};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value as Json};
use tracing::trace;

use crate::ResourceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Patch,
    List,
    UpdateStatus,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ResourceKey, Json>,
    next_rv: u64,
    calls: FxHashMap<Op, usize>,
    failures: FxHashMap<Op, VecDeque<ConvergeError>>,
}

impl Inner {
    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    fn enter(&mut self, op: Op) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn metadata_mut(obj: &mut Json) -> Option<&mut Map<String, Json>> {
    let root = obj.as_object_mut()?;
    root.entry("metadata").or_insert_with(|| Json::Object(Map::new())).as_object_mut()
}

fn resource_version(obj: &Json) -> Option<&str> {
    obj.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|v| v.as_str())
}

/// Everything except metadata and status: what `generation` tracks.
fn spec_view(obj: &Json) -> Json {
    match obj.as_object() {
        Some(map) => Json::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "metadata" && k.as_str() != "status")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        None => Json::Null,
    }
}

/// RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Json, patch: &Json) {
    let Some(patch_map) = patch.as_object() else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Json::Object(Map::new());
    }
    if let Some(target_map) = target.as_object_mut() {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Json::Null), v);
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed an object as-is (status included), assigning uid and resourceVersion
    /// when missing. Returns its identity.
    pub fn insert(&self, mut obj: Json) -> Result<ResourceKey> {
        let key = DesiredResource::from_manifest(obj.clone())?.key().clone();
        let mut inner = self.lock();
        let rv = inner.bump_rv();
        if let Some(meta) = metadata_mut(&mut obj) {
            meta.entry("uid").or_insert_with(|| Json::String(uuid::Uuid::new_v4().to_string()));
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.entry("generation").or_insert(Json::from(1));
        }
        inner.objects.insert(key.clone(), obj);
        Ok(key)
    }

    pub fn object(&self, key: &ResourceKey) -> Option<Json> {
        self.lock().objects.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the status of a stored object, as another controller would.
    pub fn set_status(&self, key: &ResourceKey, status: Json) -> Result<()> {
        let mut inner = self.lock();
        let rv = inner.bump_rv();
        let obj = inner.objects.get_mut(key).ok_or_else(|| ConvergeError::NotFound(key.to_string()))?;
        if let Some(root) = obj.as_object_mut() {
            root.insert("status".into(), status);
        }
        if let Some(meta) = metadata_mut(obj) {
            meta.insert("resourceVersion".into(), Json::String(rv));
        }
        Ok(())
    }

    /// Bump the resourceVersion of a stored object without changing it, making
    /// any previously read copy stale.
    pub fn touch(&self, key: &ResourceKey) -> Result<()> {
        let mut inner = self.lock();
        let rv = inner.bump_rv();
        let obj = inner.objects.get_mut(key).ok_or_else(|| ConvergeError::NotFound(key.to_string()))?;
        if let Some(meta) = metadata_mut(obj) {
            meta.insert("resourceVersion".into(), Json::String(rv));
        }
        Ok(())
    }

    /// Make the next call of `op` fail with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, op: Op, err: ConvergeError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of create, patch and status-write calls.
    pub fn writes(&self) -> usize {
        self.calls(Op::Create) + self.calls(Op::Patch) + self.calls(Op::UpdateStatus)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Json>> {
        let mut inner = self.lock();
        inner.enter(Op::Get)?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn create(&self, key: &ResourceKey, body: &Json, _field_manager: &str) -> Result<Json> {
        let mut inner = self.lock();
        inner.enter(Op::Create)?;
        if inner.objects.contains_key(key) {
            return Err(ConvergeError::AlreadyExists(key.to_string()));
        }
        let mut obj = body.clone();
        if let Some(root) = obj.as_object_mut() {
            root.remove("status");
        }
        let rv = inner.bump_rv();
        if let Some(meta) = metadata_mut(&mut obj) {
            meta.insert("uid".into(), Json::String(uuid::Uuid::new_v4().to_string()));
            meta.insert("resourceVersion".into(), Json::String(rv));
            meta.insert("generation".into(), Json::from(1));
        }
        trace!(resource = %key, "memory create");
        inner.objects.insert(key.clone(), obj.clone());
        Ok(obj)
    }

    async fn patch_merge(&self, key: &ResourceKey, patch: &Json, _field_manager: &str) -> Result<Json> {
        let mut inner = self.lock();
        inner.enter(Op::Patch)?;
        let current = inner.objects.get(key).cloned().ok_or_else(|| ConvergeError::NotFound(key.to_string()))?;
        if let Some(want) = resource_version(patch) {
            if Some(want) != resource_version(&current) {
                return Err(ConvergeError::Conflict(format!("{}: resourceVersion {} is stale", key, want)));
            }
        }
        let mut patch = patch.clone();
        if let Some(root) = patch.as_object_mut() {
            root.remove("status");
        }
        if let Some(meta) = metadata_mut(&mut patch) {
            for field in ["resourceVersion", "uid", "generation", "creationTimestamp"] {
                meta.remove(field);
            }
        }
        let mut merged = current.clone();
        merge_patch(&mut merged, &patch);
        if merged == current {
            return Ok(current);
        }
        let generation_changed = spec_view(&merged) != spec_view(&current);
        let rv = inner.bump_rv();
        if let Some(meta) = metadata_mut(&mut merged) {
            meta.insert("resourceVersion".into(), Json::String(rv));
            if generation_changed {
                let next = meta.get("generation").and_then(|g| g.as_i64()).unwrap_or(0) + 1;
                meta.insert("generation".into(), Json::from(next));
            }
        }
        trace!(resource = %key, "memory patch");
        inner.objects.insert(key.clone(), merged.clone());
        Ok(merged)
    }

    async fn list(&self, gvk: &Gvk, namespace: Option<&str>) -> Result<Vec<Json>> {
        let mut inner = self.lock();
        inner.enter(Op::List)?;
        Ok(inner
            .objects
            .iter()
            .filter(|(k, _)| k.gvk() == *gvk && (namespace.is_none() || k.namespace() == namespace))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn update_status(&self, key: &ResourceKey, object: &Json, _field_manager: &str) -> Result<Json> {
        let mut inner = self.lock();
        inner.enter(Op::UpdateStatus)?;
        let current = inner.objects.get(key).cloned().ok_or_else(|| ConvergeError::NotFound(key.to_string()))?;
        if let Some(want) = resource_version(object) {
            if Some(want) != resource_version(&current) {
                return Err(ConvergeError::Conflict(format!("{}: resourceVersion {} is stale", key, want)));
            }
        }
        let mut updated = current;
        let status = object.get("status").cloned().unwrap_or(Json::Null);
        if let Some(root) = updated.as_object_mut() {
            root.insert("status".into(), status);
        }
        let rv = inner.bump_rv();
        if let Some(meta) = metadata_mut(&mut updated) {
            meta.insert("resourceVersion".into(), Json::String(rv));
        }
        inner.objects.insert(key.clone(), updated.clone());
        Ok(updated)
    }
}
