use converge_core::{ConvergeError, DesiredResource, Result};
use converge_reconcile::Generator;
use serde_json::json;

use crate::{TenancyDefaults, TenantNamespace};

pub const LIMIT_RANGE_NAME: &str = "tenant-limit-range";
pub const RESOURCE_QUOTA_NAME: &str = "tenant-resource-quota";
pub const NETWORK_POLICY_NAME: &str = "tenant-network-policy";

/// Desired children of a `TenantNamespace`: the namespace, then the limit
/// range, quota and network policy inside it.
#[derive(Debug, Clone, Default)]
pub struct TenantGenerator {
    defaults: TenancyDefaults,
}

impl TenantGenerator {
    pub fn new(defaults: TenancyDefaults) -> Self {
        Self { defaults }
    }
}

impl Generator<TenantNamespace> for TenantGenerator {
    fn generate(&self, owner: &TenantNamespace) -> Result<Vec<DesiredResource>> {
        let ns = owner.spec.namespace.trim();
        if ns.is_empty() {
            return Err(ConvergeError::Generator("spec.namespace must not be empty".into()));
        }
        let r = self.defaults.resolve(&owner.spec.resources);

        let namespace = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": ns}
        });
        let limit_range = json!({
            "apiVersion": "v1",
            "kind": "LimitRange",
            "metadata": {"name": LIMIT_RANGE_NAME, "namespace": ns},
            "spec": {
                "limits": [{
                    "type": "Container",
                    "default": {"cpu": r.limits.0, "memory": r.limits.1},
                    "defaultRequest": {"cpu": r.requests.0, "memory": r.requests.1},
                    "max": {"cpu": r.max.0, "memory": r.max.1}
                }]
            }
        });
        let quota = json!({
            "apiVersion": "v1",
            "kind": "ResourceQuota",
            "metadata": {"name": RESOURCE_QUOTA_NAME, "namespace": ns},
            "spec": {
                "hard": {
                    "requests.cpu": r.quota_requests.0,
                    "requests.memory": r.quota_requests.1,
                    "limits.cpu": r.quota_limits.0,
                    "limits.memory": r.quota_limits.1
                }
            }
        });
        let network_policy = json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "NetworkPolicy",
            "metadata": {"name": NETWORK_POLICY_NAME, "namespace": ns},
            "spec": {
                "podSelector": {},
                "policyTypes": ["Ingress", "Egress"],
                "egress": [{"ports": [{"protocol": "UDP", "port": 53}]}]
            }
        });

        [namespace, limit_range, quota, network_policy]
            .into_iter()
            .map(DesiredResource::from_manifest)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CpuMemory, TenantNamespaceSpec, TenantResources};

    fn owner(ns: &str, resources: TenantResources) -> TenantNamespace {
        TenantNamespace::new("tenant", TenantNamespaceSpec { namespace: ns.into(), resources })
    }

    #[test]
    fn generates_four_children_in_order() {
        let out = TenantGenerator::default().generate(&owner("team-a", TenantResources::default())).unwrap();
        let kinds: Vec<_> = out.iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec!["Namespace", "LimitRange", "ResourceQuota", "NetworkPolicy"]);
        assert_eq!(out[0].namespace(), None);
        assert!(out[1..].iter().all(|d| d.namespace() == Some("team-a")));
        assert_eq!(out[3].key().group, "networking.k8s.io");
    }

    #[test]
    fn defaults_fill_limit_range_and_quota() {
        let out = TenantGenerator::default().generate(&owner("team-a", TenantResources::default())).unwrap();
        let limits = &out[1].body()["spec"]["limits"][0];
        assert_eq!(limits["default"]["cpu"], "250m");
        assert_eq!(limits["defaultRequest"]["memory"], "64Mi");
        assert_eq!(limits["max"]["memory"], "256Mi");
        let hard = &out[2].body()["spec"]["hard"];
        assert_eq!(hard["requests.cpu"], "2000m");
        assert_eq!(hard["limits.memory"], "4Gi");
    }

    #[test]
    fn spec_overrides_defaults() {
        let resources = TenantResources {
            max: Some(CpuMemory { cpu: Some("2".into()), memory: Some("1Gi".into()) }),
            ..Default::default()
        };
        let out = TenantGenerator::default().generate(&owner("team-a", resources)).unwrap();
        assert_eq!(out[1].body()["spec"]["limits"][0]["max"]["cpu"], "2");
    }

    #[test]
    fn network_policy_denies_ingress_and_allows_dns() {
        let out = TenantGenerator::default().generate(&owner("team-a", TenantResources::default())).unwrap();
        let spec = &out[3].body()["spec"];
        assert_eq!(spec["policyTypes"], json!(["Ingress", "Egress"]));
        assert!(spec.get("ingress").is_none());
        assert_eq!(spec["egress"][0]["ports"][0], json!({"protocol": "UDP", "port": 53}));
    }

    #[test]
    fn empty_namespace_is_a_generator_error() {
        let err = TenantGenerator::default().generate(&owner("  ", TenantResources::default())).unwrap_err();
        assert!(matches!(err, ConvergeError::Generator(_)));
    }
}
