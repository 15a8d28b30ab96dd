//! Converge reconcile: drives an owner object's children toward the desired
//! state through a fixed sequence of phases and reports progress on its status.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::sync::Arc;

use converge_apply::Persister;
use converge_core::{Clock, ConvergeError, Gvk, OwnerRef, OwnerStatus, PhaseCondition, ResourceCondition, ResourceKey, Result};
use converge_kubehub::ResourceStore;
use converge_readiness::ReadinessRegistry;
use converge_store::ResourceSet;
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};

pub mod controller;
pub mod hooks;
pub mod phases;
pub mod resource_phase;
pub mod status;

pub use controller::{error_policy, reconcile, run, ReconcileOutcome, Reconciler, ReconcilerBuilder, RunOptions};
pub use hooks::{CheckReadyHook, Generator, Hooks, Mutation, MutateHook, PassThrough, WaitHook};
pub use phases::{Phase, PhaseSequencer, SequenceOutcome};
pub use status::StatusReporter;

/// A user-authored configuration object whose children this engine manages.
pub trait Owner:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn owner_status(&self) -> Option<&OwnerStatus>;
}

pub fn owner_gvk<K: Owner>() -> Gvk {
    Gvk::new(&K::group(&()), &K::version(&()), &K::kind(&()))
}

pub fn owner_key<K: Owner>(owner: &K) -> ResourceKey {
    ResourceKey::new(&owner_gvk::<K>(), owner.namespace().as_deref(), &owner.name_any())
}

/// Owner reference for children of `owner`. Fails when the owner has no uid yet.
pub fn owner_ref<K: Owner>(owner: &K) -> Result<OwnerRef> {
    let uid = owner
        .uid()
        .ok_or_else(|| ConvergeError::Validation(format!("{} has no metadata.uid", owner_key(owner))))?;
    Ok(OwnerRef { gvk: owner_gvk::<K>(), namespace: owner.namespace(), name: owner.name_any(), uid })
}

/// Collaborators shared by every reconcile of one owner kind.
pub struct Context<K> {
    pub store: Arc<dyn ResourceStore>,
    pub persister: Persister,
    pub readiness: ReadinessRegistry,
    pub hooks: Hooks<K>,
    pub clock: Arc<dyn Clock>,
}

/// Working state of a single reconcile.
pub struct ReconcileCtx<K> {
    pub owner: K,
    pub key: ResourceKey,
    pub owner_ref: OwnerRef,
    pub resources: ResourceSet,
    /// Status as it will be written at the end of the reconcile.
    pub status: OwnerStatus,
    ctx: Arc<Context<K>>,
}

impl<K: Owner> ReconcileCtx<K> {
    pub fn new(owner: K, ctx: Arc<Context<K>>) -> Result<Self> {
        let key = owner_key(&owner);
        let owner_ref = owner_ref(&owner)?;
        let status = owner.owner_status().cloned().unwrap_or_default();
        Ok(Self { owner, key, owner_ref, resources: ResourceSet::new(), status, ctx })
    }

    pub fn context(&self) -> &Context<K> {
        &self.ctx
    }

    pub fn record_phase(&mut self, condition: PhaseCondition) -> bool {
        self.status.set_phase_condition(condition, self.ctx.clock.as_ref())
    }

    pub fn record_resource(&mut self, condition: ResourceCondition) -> bool {
        self.status.set_resource_condition(condition, self.ctx.clock.as_ref())
    }

    /// Whether a resource condition already marks `key` as created.
    pub fn was_created(&self, key: &ResourceKey) -> bool {
        self.status.resource_condition(key).map(|c| c.created).unwrap_or(false)
    }
}
