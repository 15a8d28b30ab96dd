//! Per-resource sub-phases run by `CreateResources`: wait for the resource's
//! dependencies, then persist it.

use async_trait::async_trait;
use converge_apply::PersistOutcome;
use converge_core::{DesiredResource, ResourceCondition, Result};
use metrics::counter;
use tracing::{debug, warn};

use crate::{Owner, ReconcileCtx};

#[async_trait]
pub trait ResourcePhase<K>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, rc: &mut ReconcileCtx<K>, desired: &DesiredResource) -> Result<bool>;
}

pub struct WaitForResource;

#[async_trait]
impl<K: Owner> ResourcePhase<K> for WaitForResource {
    fn name(&self) -> &'static str {
        "WaitForResource"
    }

    async fn execute(&self, rc: &mut ReconcileCtx<K>, desired: &DesiredResource) -> Result<bool> {
        let ready = rc.context().hooks.wait.ready_to_persist(&rc.owner, desired).await?;
        if !ready {
            debug!(owner = %rc.key, resource = %desired.key(), "waiting before persist");
            let created = rc.was_created(desired.key());
            let cond = ResourceCondition::new(
                desired.key().clone(),
                <Self as ResourcePhase<K>>::name(self),
                created,
                "waiting for resource dependencies",
            );
            rc.record_resource(cond);
        }
        Ok(ready)
    }
}

pub struct PersistResource;

#[async_trait]
impl<K: Owner> ResourcePhase<K> for PersistResource {
    fn name(&self) -> &'static str {
        "PersistResource"
    }

    async fn execute(&self, rc: &mut ReconcileCtx<K>, desired: &DesiredResource) -> Result<bool> {
        let phase = <Self as ResourcePhase<K>>::name(self);
        let result = rc.context().persister.create_or_update(desired, &rc.owner_ref).await;
        match result {
            Ok(outcome) => {
                let message = match outcome {
                    PersistOutcome::SkippedImmutable => "resource exists; updates not permitted for this kind",
                    PersistOutcome::Conflicted => "resource changed during update; retrying",
                    _ => "resource in desired state",
                };
                rc.record_resource(ResourceCondition::new(desired.key().clone(), phase, true, message));
                Ok(true)
            }
            Err(e) => {
                warn!(owner = %rc.key, resource = %desired.key(), error = %e, "persist failed");
                counter!("reconcile_persist_err", 1u64);
                let created = rc.was_created(desired.key());
                rc.record_resource(ResourceCondition::new(desired.key().clone(), phase, created, e.to_string()));
                Err(e)
            }
        }
    }
}

/// Run the sub-phases for every resource in set order. Stops at the first
/// resource that has to wait or fails.
pub async fn run_all<K: Owner>(rc: &mut ReconcileCtx<K>) -> Result<bool> {
    let phases: [&dyn ResourcePhase<K>; 2] = [&WaitForResource, &PersistResource];
    let resources: Vec<DesiredResource> = rc.resources.iter().cloned().collect();
    for desired in &resources {
        for phase in phases {
            if !phase.execute(rc, desired).await? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
