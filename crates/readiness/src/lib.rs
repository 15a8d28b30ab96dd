//! Converge readiness: kind-dispatched predicates over freshly fetched live objects.

#![forbid(unsafe_code)]

use std::sync::Arc;

use converge_core::{Gvk, ResourceKey, Result};
use converge_kubehub::ResourceStore;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::debug;

pub mod kinds;

/// A readiness predicate for one kind. `expected_keys` is only meaningful for
/// keyed-data kinds (Secret, ConfigMap).
pub trait ReadinessCheck: Send + Sync {
    fn check(&self, live: &Json, expected_keys: &[String]) -> Result<bool>;
}

impl<F> ReadinessCheck for F
where
    F: Fn(&Json, &[String]) -> Result<bool> + Send + Sync,
{
    fn check(&self, live: &Json, expected_keys: &[String]) -> Result<bool> {
        self(live, expected_keys)
    }
}

/// Kind to predicate table, plus per-resource expected data keys.
#[derive(Clone, Default)]
pub struct ReadinessRegistry {
    checks: FxHashMap<(String, String), Arc<dyn ReadinessCheck>>,
    expected_keys: FxHashMap<ResourceKey, Vec<String>>,
}

impl std::fmt::Debug for ReadinessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.checks.keys().collect();
        kinds.sort();
        f.debug_struct("ReadinessRegistry").field("kinds", &kinds).finish()
    }
}

impl ReadinessRegistry {
    /// Empty registry: every kind is ready without a fetch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in workload, network, keyed-data and CRD predicates.
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register("", "Namespace", kinds::namespace);
        r.register("apps", "Deployment", kinds::deployment);
        r.register("apps", "StatefulSet", kinds::stateful_set);
        r.register("apps", "DaemonSet", kinds::daemon_set);
        r.register("batch", "Job", kinds::job);
        r.register("", "Service", kinds::service);
        r.register("", "Secret", kinds::secret);
        r.register("", "ConfigMap", kinds::config_map);
        r.register("apiextensions.k8s.io", "CustomResourceDefinition", kinds::exists);
        r
    }

    pub fn register(&mut self, group: &str, kind: &str, check: impl ReadinessCheck + 'static) -> &mut Self {
        self.checks.insert((group.to_string(), kind.to_string()), Arc::new(check));
        self
    }

    /// Require `keys` to hold non-empty values before `resource` counts as ready.
    pub fn expect_keys(&mut self, resource: ResourceKey, keys: Vec<String>) -> &mut Self {
        self.expected_keys.insert(resource, keys);
        self
    }

    /// Readiness of one resource. Unregistered kinds are ready without fetching;
    /// a registered kind whose live object is absent is not ready.
    pub async fn is_ready(&self, store: &dyn ResourceStore, key: &ResourceKey) -> Result<bool> {
        let Some(check) = self.checks.get(&(key.group.clone(), key.kind.clone())) else {
            return Ok(true);
        };
        let Some(live) = store.get(key).await? else {
            debug!(resource = %key, "not ready: absent");
            return Ok(false);
        };
        let expected = self.expected_keys.get(key).map(Vec::as_slice).unwrap_or_default();
        let ready = check.check(&live, expected)?;
        debug!(resource = %key, ready, "readiness evaluated");
        Ok(ready)
    }

    /// Conjunction over `keys`, stopping at the first not-ready resource or error.
    pub async fn are_ready<'a, I>(&self, store: &dyn ResourceStore, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = &'a ResourceKey>,
    {
        for key in keys {
            if !self.is_ready(store, key).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Readiness of the namespace `key` lives in. Cluster-scoped resources
    /// have no namespace and count as ready.
    pub async fn namespace_ready(&self, store: &dyn ResourceStore, key: &ResourceKey) -> Result<bool> {
        match key.namespace() {
            Some(ns) => {
                let ns_key = ResourceKey::new(&Gvk::new("", "v1", "Namespace"), None, ns);
                self.is_ready(store, &ns_key).await
            }
            None => Ok(true),
        }
    }
}
