use serde::{Deserialize, Serialize};

use crate::{CpuMemory, TenantResources};

/// Quantities used where a `TenantNamespace` leaves a resource setting out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenancyDefaults {
    pub limits_cpu: String,
    pub limits_memory: String,
    pub requests_cpu: String,
    pub requests_memory: String,
    pub max_cpu: String,
    pub max_memory: String,
    pub quota_requests_cpu: String,
    pub quota_requests_memory: String,
    pub quota_limits_cpu: String,
    pub quota_limits_memory: String,
}

impl Default for TenancyDefaults {
    fn default() -> Self {
        Self {
            limits_cpu: "250m".into(),
            limits_memory: "64Mi".into(),
            requests_cpu: "250m".into(),
            requests_memory: "64Mi".into(),
            max_cpu: "500m".into(),
            max_memory: "256Mi".into(),
            quota_requests_cpu: "2000m".into(),
            quota_requests_memory: "4Gi".into(),
            quota_limits_cpu: "2000m".into(),
            quota_limits_memory: "4Gi".into(),
        }
    }
}

/// Fully resolved quantities for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub limits: (String, String),
    pub requests: (String, String),
    pub max: (String, String),
    pub quota_requests: (String, String),
    pub quota_limits: (String, String),
}

fn pick(spec: Option<&CpuMemory>, cpu: &str, memory: &str) -> (String, String) {
    let non_empty = |v: Option<&String>| v.filter(|s| !s.is_empty()).cloned();
    (
        non_empty(spec.and_then(|c| c.cpu.as_ref())).unwrap_or_else(|| cpu.to_string()),
        non_empty(spec.and_then(|c| c.memory.as_ref())).unwrap_or_else(|| memory.to_string()),
    )
}

impl TenancyDefaults {
    pub fn resolve(&self, spec: &TenantResources) -> Resolved {
        let quota = spec.quota.as_ref();
        Resolved {
            limits: pick(spec.limits.as_ref(), &self.limits_cpu, &self.limits_memory),
            requests: pick(spec.requests.as_ref(), &self.requests_cpu, &self.requests_memory),
            max: pick(spec.max.as_ref(), &self.max_cpu, &self.max_memory),
            quota_requests: pick(
                quota.and_then(|q| q.requests.as_ref()),
                &self.quota_requests_cpu,
                &self.quota_requests_memory,
            ),
            quota_limits: pick(quota.and_then(|q| q.limits.as_ref()), &self.quota_limits_cpu, &self.quota_limits_memory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TenantQuota;

    #[test]
    fn empty_spec_takes_every_default() {
        let r = TenancyDefaults::default().resolve(&TenantResources::default());
        assert_eq!(r.limits, ("250m".into(), "64Mi".into()));
        assert_eq!(r.max, ("500m".into(), "256Mi".into()));
        assert_eq!(r.quota_limits, ("2000m".into(), "4Gi".into()));
    }

    #[test]
    fn explicit_values_win_field_by_field() {
        let spec = TenantResources {
            requests: Some(CpuMemory { cpu: Some("100m".into()), memory: None }),
            quota: Some(TenantQuota {
                requests: None,
                limits: Some(CpuMemory { cpu: Some("".into()), memory: Some("8Gi".into()) }),
            }),
            ..Default::default()
        };
        let r = TenancyDefaults::default().resolve(&spec);
        assert_eq!(r.requests, ("100m".into(), "64Mi".into()));
        // an empty string counts as unset
        assert_eq!(r.quota_limits, ("2000m".into(), "8Gi".into()));
        assert_eq!(r.quota_requests, ("2000m".into(), "4Gi".into()));
    }
}
