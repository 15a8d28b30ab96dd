//! Reconcile phases and the sequencer that runs them in order.
//!
//! Every reconcile starts again from the first phase. A phase either proceeds,
//! halts (`Ok(false)`, requeue after its default delay) or fails (requeue with
//! backoff). Each exit is recorded as a phase condition on the owner status.

use std::time::Duration;

use async_trait::async_trait;
use converge_core::{ConvergeError, PhaseCondition, Result};
use tracing::{debug, info};

use crate::{resource_phase, Owner, ReconcileCtx};

pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(10);
pub const CHECK_READY_REQUEUE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Phase<K>: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_requeue(&self) -> Duration {
        DEFAULT_REQUEUE
    }

    /// Returns whether the sequencer may move on to the next phase.
    async fn execute(&self, rc: &mut ReconcileCtx<K>) -> Result<bool>;
}

#[derive(Debug)]
pub enum SequenceOutcome {
    Complete,
    Requeue { phase: &'static str, after: Duration },
    Failed { phase: &'static str, after: Duration, error: ConvergeError },
}

pub struct PhaseSequencer<K> {
    phases: Vec<Box<dyn Phase<K>>>,
}

impl<K: Owner> Default for PhaseSequencer<K> {
    fn default() -> Self {
        Self::standard()
    }
}

impl<K: Owner> PhaseSequencer<K> {
    /// PreFlight, CreateResources, CheckReady, Complete.
    pub fn standard() -> Self {
        Self::new(vec![Box::new(PreFlight), Box::new(CreateResources), Box::new(CheckReady), Box::new(Complete)])
    }

    pub fn new(phases: Vec<Box<dyn Phase<K>>>) -> Self {
        Self { phases }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.phases.iter().map(|p| p.name()).collect()
    }

    pub async fn run(&self, rc: &mut ReconcileCtx<K>) -> SequenceOutcome {
        for phase in &self.phases {
            let name = phase.name();
            match phase.execute(rc).await {
                Ok(true) => {
                    rc.record_phase(PhaseCondition::complete(name));
                }
                Ok(false) => {
                    debug!(owner = %rc.key, phase = name, "phase halted");
                    rc.record_phase(PhaseCondition::pending(name));
                    rc.status.ready = false;
                    return SequenceOutcome::Requeue { phase: name, after: phase.default_requeue() };
                }
                Err(error) => {
                    rc.record_phase(PhaseCondition::failed(name, &error));
                    rc.status.ready = false;
                    return SequenceOutcome::Failed { phase: name, after: phase.default_requeue(), error };
                }
            }
        }
        SequenceOutcome::Complete
    }
}

/// Refuses to proceed for an owner that is being deleted; otherwise marks its
/// dependencies as satisfied.
pub struct PreFlight;

#[async_trait]
impl<K: Owner> Phase<K> for PreFlight {
    fn name(&self) -> &'static str {
        "PreFlight"
    }

    async fn execute(&self, rc: &mut ReconcileCtx<K>) -> Result<bool> {
        if rc.owner.meta().deletion_timestamp.is_some() {
            info!(owner = %rc.key, "owner is being deleted");
            return Ok(false);
        }
        rc.status.dependencies_satisfied = true;
        Ok(true)
    }
}

pub struct CreateResources;

#[async_trait]
impl<K: Owner> Phase<K> for CreateResources {
    fn name(&self) -> &'static str {
        "CreateResources"
    }

    async fn execute(&self, rc: &mut ReconcileCtx<K>) -> Result<bool> {
        resource_phase::run_all(rc).await
    }
}

pub struct CheckReady;

#[async_trait]
impl<K: Owner> Phase<K> for CheckReady {
    fn name(&self) -> &'static str {
        "CheckReady"
    }

    fn default_requeue(&self) -> Duration {
        CHECK_READY_REQUEUE
    }

    async fn execute(&self, rc: &mut ReconcileCtx<K>) -> Result<bool> {
        let ctx = rc.context();
        if !ctx.readiness.are_ready(ctx.store.as_ref(), rc.resources.keys()).await? {
            return Ok(false);
        }
        ctx.hooks.check_ready.owner_ready(&rc.owner).await
    }
}

pub struct Complete;

#[async_trait]
impl<K: Owner> Phase<K> for Complete {
    fn name(&self) -> &'static str {
        "Complete"
    }

    async fn execute(&self, rc: &mut ReconcileCtx<K>) -> Result<bool> {
        rc.status.ready = true;
        info!(owner = %rc.key, resources = rc.resources.len(), "owner converged");
        Ok(true)
    }
}
