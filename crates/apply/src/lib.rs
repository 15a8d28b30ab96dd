//! Converge apply: idempotent create-or-update of child resources with minimal diffs.

#![forbid(unsafe_code)]

use std::sync::Arc;

use converge_core::{DesiredResource, OwnerRef, Result};
use converge_kubehub::ResourceStore;
use metrics::{counter, histogram};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

pub mod quantity;

pub const DEFAULT_FIELD_MANAGER: &str = "converge";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds + self.updates + self.removes == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Created,
    Updated(DiffSummary),
    Unchanged,
    SkippedImmutable,
    /// The live object moved on between read and patch; the next reconcile retries.
    Conflicted,
}

impl PersistOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistOutcome::Created => "created",
            PersistOutcome::Updated(_) => "updated",
            PersistOutcome::Unchanged => "unchanged",
            PersistOutcome::SkippedImmutable => "skipped_immutable",
            PersistOutcome::Conflicted => "conflicted",
        }
    }
}

/// Create-or-update engine over a [`ResourceStore`].
#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn ResourceStore>,
    field_manager: String,
    immutable_kinds: FxHashSet<String>,
}

impl Persister {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        let mut immutable_kinds = FxHashSet::default();
        immutable_kinds.insert("CustomResourceDefinition".to_string());
        Self { store, field_manager: DEFAULT_FIELD_MANAGER.to_string(), immutable_kinds }
    }

    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    /// Replace the set of kinds whose spec is never updated once created.
    pub fn with_immutable_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn field_manager(&self) -> &str {
        &self.field_manager
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Bring the live object in line with `desired`, writing only when the
    /// merged result differs from what is live.
    pub async fn create_or_update(&self, desired: &DesiredResource, owner: &OwnerRef) -> Result<PersistOutcome> {
        let t0 = std::time::Instant::now();
        let key = desired.key();
        let mut owned = desired.clone();
        owned.set_owner_reference(owner);
        let mut body = owned.into_body();

        let Some(live) = self.store.get(key).await? else {
            self.store.create(key, &body, &self.field_manager).await?;
            info!(resource = %key, "resource created");
            return Ok(self.finish(PersistOutcome::Created, t0));
        };

        if self.immutable_kinds.contains(desired.kind()) {
            debug!(resource = %key, "immutable kind; skipping update");
            return Ok(self.finish(PersistOutcome::SkippedImmutable, t0));
        }

        if live_namespace(&live).is_none() {
            if let Some(meta) = body.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                meta.remove("namespace");
            }
        }

        let mut merged = live.clone();
        deep_merge(&mut merged, &body);
        let summary = diff_summary(&strip_noisy(merged, desired.kind()), &strip_noisy(live.clone(), desired.kind()));
        if summary.is_empty() {
            debug!(resource = %key, "no drift");
            return Ok(self.finish(PersistOutcome::Unchanged, t0));
        }

        let mut patch = body;
        if let Some(root) = patch.as_object_mut() {
            root.remove("status");
        }
        if let (Some(rv), Some(meta)) = (
            live.get("metadata").and_then(|m| m.get("resourceVersion")).cloned(),
            patch.get_mut("metadata").and_then(|m| m.as_object_mut()),
        ) {
            meta.insert("resourceVersion".into(), rv);
        }
        match self.store.patch_merge(key, &patch, &self.field_manager).await {
            Ok(_) => {
                info!(resource = %key, adds = summary.adds, updates = summary.updates, "resource updated");
                Ok(self.finish(PersistOutcome::Updated(summary), t0))
            }
            Err(e) if e.is_conflict() => {
                info!(resource = %key, error = %e, "live object changed during update; will retry");
                Ok(self.finish(PersistOutcome::Conflicted, t0))
            }
            Err(e) => {
                counter!("persist_err", 1u64);
                Err(e)
            }
        }
    }

    fn finish(&self, outcome: PersistOutcome, t0: std::time::Instant) -> PersistOutcome {
        histogram!("persist_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match outcome {
            PersistOutcome::Created => counter!("persist_created", 1u64),
            PersistOutcome::Updated(_) => counter!("persist_updated", 1u64),
            PersistOutcome::Unchanged => counter!("persist_unchanged", 1u64),
            PersistOutcome::SkippedImmutable => counter!("persist_skipped_immutable", 1u64),
            PersistOutcome::Conflicted => counter!("persist_conflicted", 1u64),
        }
        outcome
    }
}

fn live_namespace(live: &Json) -> Option<&str> {
    live.get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Overlay `desired` onto `live`: scalars override, objects merge recursively,
/// arrays merge element-wise and take the desired length. A live quantity that
/// equals the desired one in value is kept as the server wrote it.
pub fn deep_merge(live: &mut Json, desired: &Json) {
    merge_under(live, desired, None);
}

fn merge_under(live: &mut Json, desired: &Json, key: Option<&str>) {
    match (live, desired) {
        (Json::Object(lo), Json::Object(dobj)) => {
            let quantities = key.is_some_and(quantity::is_quantity_map);
            for (k, dv) in dobj {
                match lo.get_mut(k) {
                    Some(lv) => match (lv, dv) {
                        (Json::String(ls), Json::String(ds)) if quantities => {
                            if !quantity::same_quantity(ls, ds) {
                                *ls = ds.clone();
                            }
                        }
                        (lv, dv) => merge_under(lv, dv, Some(k.as_str())),
                    },
                    None => {
                        lo.insert(k.clone(), dv.clone());
                    }
                }
            }
        }
        (Json::Array(la), Json::Array(da)) => {
            la.truncate(da.len());
            for (i, dv) in da.iter().enumerate() {
                match la.get_mut(i) {
                    Some(lv) => merge_under(lv, dv, key),
                    None => la.push(dv.clone()),
                }
            }
        }
        (lv, dv) => *lv = dv.clone(),
    }
}

/// Drop server-owned bookkeeping and fields the API server rewrites for `kind`.
pub fn strip_noisy(mut v: Json, kind: &str) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("generation");
        meta.remove("creationTimestamp");
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    match kind {
        "StatefulSet" => {
            if let Some(templates) = v.pointer_mut("/spec/volumeClaimTemplates").and_then(|t| t.as_array_mut()) {
                for t in templates.iter_mut().filter_map(|t| t.as_object_mut()) {
                    t.remove("apiVersion");
                    t.remove("kind");
                    t.remove("status");
                }
            }
        }
        "PodDisruptionBudget" => {
            if let Some(spec) = v.get_mut("spec").and_then(|s| s.as_object_mut()) {
                spec.remove("selector");
            }
        }
        _ => {}
    }
    v
}

pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                s.updates += aa.iter().zip(bb.iter()).filter(|(x, y)| x != y).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}
