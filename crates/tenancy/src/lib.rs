//! Converge tenancy: the `TenantNamespace` owner kind.
//!
//! A `TenantNamespace` asks for a namespace with default container limits, a
//! resource quota and a network policy that denies ingress while allowing DNS
//! egress. Quantities left out of `.spec.resources` fall back to [`TenancyDefaults`].

#![forbid(unsafe_code)]

use std::sync::Arc;

use converge_core::OwnerStatus;
use converge_kubehub::ResourceStore;
use converge_readiness::ReadinessRegistry;
use converge_reconcile::{Hooks, Owner};
use k8s_openapi::api::core::v1::{LimitRange, Namespace, ResourceQuota};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::core::ApiResource;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod generator;
pub mod hooks;

pub use defaults::TenancyDefaults;
pub use generator::TenantGenerator;
pub use hooks::NamespaceGate;

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tenancy.converge.dev",
    version = "v1alpha1",
    kind = "TenantNamespace",
    shortname = "tns",
    status = "OwnerStatus",
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantNamespaceSpec {
    /// Name of the namespace to create.
    pub namespace: String,
    #[serde(default)]
    pub resources: TenantResources,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantResources {
    /// Default container limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<CpuMemory>,
    /// Default container requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<CpuMemory>,
    /// Per-container maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<CpuMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<TenantQuota>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CpuMemory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Namespace-wide totals.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TenantQuota {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<CpuMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<CpuMemory>,
}

impl Owner for TenantNamespace {
    fn owner_status(&self) -> Option<&OwnerStatus> {
        self.status.as_ref()
    }
}

/// Hooks for `TenantNamespace`. With `wait_for_namespace`, namespaced children
/// are held back until their namespace is active.
pub fn tenant_hooks(
    defaults: TenancyDefaults,
    wait_for_namespace: bool,
    store: Arc<dyn ResourceStore>,
    readiness: ReadinessRegistry,
) -> Hooks<TenantNamespace> {
    let hooks = Hooks::new(TenantGenerator::new(defaults));
    if wait_for_namespace {
        hooks.with_wait(NamespaceGate::new(store, readiness))
    } else {
        hooks
    }
}

/// Child kinds whose changes retrigger the owning `TenantNamespace`.
pub fn owned_kinds() -> Vec<ApiResource> {
    vec![
        ApiResource::erase::<Namespace>(&()),
        ApiResource::erase::<LimitRange>(&()),
        ApiResource::erase::<ResourceQuota>(&()),
        ApiResource::erase::<NetworkPolicy>(&()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_is_cluster_scoped_with_status() {
        let crd = TenantNamespace::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("tenantnamespaces.tenancy.converge.dev"));
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.short_names, Some(vec!["tns".to_string()]));
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }

    #[test]
    fn spec_accepts_partial_resources() {
        let spec: TenantNamespaceSpec = serde_json::from_value(serde_json::json!({
            "namespace": "team-a",
            "resources": {"quota": {"limits": {"cpu": "8"}}}
        }))
        .unwrap();
        assert_eq!(spec.namespace, "team-a");
        assert!(spec.resources.limits.is_none());
        let quota_limits = spec.resources.quota.unwrap().limits.unwrap();
        assert_eq!(quota_limits.cpu.as_deref(), Some("8"));
        assert!(quota_limits.memory.is_none());
    }

    #[test]
    fn owned_kinds_cover_generated_children() {
        let kinds: Vec<_> = owned_kinds().into_iter().map(|ar| ar.kind).collect();
        assert_eq!(kinds, vec!["Namespace", "LimitRange", "ResourceQuota", "NetworkPolicy"]);
    }
}
