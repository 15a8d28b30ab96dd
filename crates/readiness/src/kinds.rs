//! Built-in readiness predicates. Each decodes the live object into its typed
//! form and inspects status; none of them fetch.

use converge_core::{ConvergeError, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use serde_json::Value as Json;

fn decode<T: serde::de::DeserializeOwned>(live: &Json) -> Result<T> {
    Ok(serde_json::from_value(live.clone())?)
}

pub fn namespace(live: &Json, _expected: &[String]) -> Result<bool> {
    let ns: Namespace = decode(live)?;
    let phase = ns.status.and_then(|s| s.phase);
    Ok(phase.as_deref() == Some("Active"))
}

pub fn deployment(live: &Json, _expected: &[String]) -> Result<bool> {
    let d: Deployment = decode(live)?;
    let Some(status) = d.status else { return Ok(false) };
    if d.metadata.generation != status.observed_generation {
        return Ok(false);
    }
    let want = d.spec.and_then(|s| s.replicas).unwrap_or(1);
    Ok(status.ready_replicas.unwrap_or(0) == want)
}

pub fn stateful_set(live: &Json, _expected: &[String]) -> Result<bool> {
    let sts: StatefulSet = decode(live)?;
    let Some(status) = sts.status else { return Ok(false) };
    if sts.metadata.generation != status.observed_generation {
        return Ok(false);
    }
    let Some(spec) = sts.spec else { return Ok(false) };
    let Some(replicas) = spec.replicas else { return Ok(false) };

    // replicas below the partition ordinal are intentionally left on the old revision
    let partition = spec
        .update_strategy
        .and_then(|s| s.rolling_update)
        .and_then(|r| r.partition)
        .filter(|p| *p > 0)
        .unwrap_or(0);
    let must_update = (replicas - partition).max(0);
    if status.updated_replicas.unwrap_or(0) < must_update {
        return Ok(false);
    }
    if status.ready_replicas.unwrap_or(0) < replicas {
        return Ok(false);
    }
    // scale-down still in progress
    Ok(status.replicas <= replicas)
}

pub fn daemon_set(live: &Json, _expected: &[String]) -> Result<bool> {
    let ds: DaemonSet = decode(live)?;
    let Some(status) = ds.status else { return Ok(false) };
    Ok(status.desired_number_scheduled == status.number_ready
        && status.number_ready > 0
        && status.number_unavailable.unwrap_or(0) < 1)
}

pub fn job(live: &Json, _expected: &[String]) -> Result<bool> {
    let job: Job = decode(live)?;
    let name = job.metadata.name.unwrap_or_default();
    let Some(status) = job.status else { return Ok(false) };
    let failed = status
        .conditions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    if failed {
        return Err(ConvergeError::ReadinessViolation(format!("job {} failed", name)));
    }
    if status.active.unwrap_or(0) > 0 || status.completion_time.is_none() {
        return Ok(false);
    }
    if status.succeeded.unwrap_or(0) != 1 {
        return Err(ConvergeError::ReadinessViolation(format!("job {} was not successful", name)));
    }
    Ok(true)
}

pub fn service(live: &Json, _expected: &[String]) -> Result<bool> {
    let svc: Service = decode(live)?;
    let spec = svc.spec.unwrap_or_default();
    let svc_type = spec.type_.as_deref().unwrap_or("ClusterIP");
    if svc_type == "ExternalName" {
        return Ok(true);
    }
    let cluster_ip = spec.cluster_ip.unwrap_or_default();
    if cluster_ip != "None" && cluster_ip.is_empty() {
        return Ok(false);
    }
    if svc_type == "LoadBalancer" {
        let ingress = svc
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .map(|i| i.len())
            .unwrap_or(0);
        return Ok(ingress > 0);
    }
    Ok(true)
}

pub fn secret(live: &Json, expected: &[String]) -> Result<bool> {
    let secret: Secret = decode(live)?;
    let data = secret.data.unwrap_or_default();
    Ok(expected.iter().all(|k| data.get(k).map(|v| !v.0.is_empty()).unwrap_or(false)))
}

pub fn config_map(live: &Json, expected: &[String]) -> Result<bool> {
    let cm: ConfigMap = decode(live)?;
    let data = cm.data.unwrap_or_default();
    Ok(expected.iter().all(|k| data.get(k).map(|v| !v.is_empty()).unwrap_or(false)))
}

/// Existence is the whole check.
pub fn exists(_live: &Json, _expected: &[String]) -> Result<bool> {
    Ok(true)
}
