//! Owner-specific collaborators: the desired-state generator and the optional
//! mutate, wait and check-ready hooks.

use std::sync::Arc;

use async_trait::async_trait;
use converge_core::{DesiredResource, Result};
use smallvec::{smallvec, SmallVec};

use crate::Owner;

/// Produces the desired child resources for an owner.
pub trait Generator<K>: Send + Sync {
    fn generate(&self, owner: &K) -> Result<Vec<DesiredResource>>;
}

impl<K, F> Generator<K> for F
where
    F: Fn(&K) -> Result<Vec<DesiredResource>> + Send + Sync,
{
    fn generate(&self, owner: &K) -> Result<Vec<DesiredResource>> {
        self(owner)
    }
}

/// Result of the mutate hook for one generated descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub replacements: SmallVec<[DesiredResource; 1]>,
    pub skip: bool,
}

impl Mutation {
    pub fn keep(desired: DesiredResource) -> Self {
        Self { replacements: smallvec![desired], skip: false }
    }

    pub fn replace(replacements: impl IntoIterator<Item = DesiredResource>) -> Self {
        Self { replacements: replacements.into_iter().collect(), skip: false }
    }

    pub fn skip() -> Self {
        Self { replacements: SmallVec::new(), skip: true }
    }
}

#[async_trait]
pub trait MutateHook<K>: Send + Sync {
    async fn mutate(&self, owner: &K, desired: DesiredResource) -> Result<Mutation>;
}

/// Gate run before a resource is persisted. `false` halts the reconcile for now.
#[async_trait]
pub trait WaitHook<K>: Send + Sync {
    async fn ready_to_persist(&self, owner: &K, desired: &DesiredResource) -> Result<bool>;
}

/// Owner-level readiness, AND-ed with the per-resource readiness.
#[async_trait]
pub trait CheckReadyHook<K>: Send + Sync {
    async fn owner_ready(&self, owner: &K) -> Result<bool>;
}

/// Default for every hook: keep the descriptor, never wait, always ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl<K: Owner> MutateHook<K> for PassThrough {
    async fn mutate(&self, _owner: &K, desired: DesiredResource) -> Result<Mutation> {
        Ok(Mutation::keep(desired))
    }
}

#[async_trait]
impl<K: Owner> WaitHook<K> for PassThrough {
    async fn ready_to_persist(&self, _owner: &K, _desired: &DesiredResource) -> Result<bool> {
        Ok(true)
    }
}

#[async_trait]
impl<K: Owner> CheckReadyHook<K> for PassThrough {
    async fn owner_ready(&self, _owner: &K) -> Result<bool> {
        Ok(true)
    }
}

pub struct Hooks<K> {
    pub generator: Arc<dyn Generator<K>>,
    pub mutate: Arc<dyn MutateHook<K>>,
    pub wait: Arc<dyn WaitHook<K>>,
    pub check_ready: Arc<dyn CheckReadyHook<K>>,
}

impl<K: Owner> Hooks<K> {
    pub fn new(generator: impl Generator<K> + 'static) -> Self {
        Self {
            generator: Arc::new(generator),
            mutate: Arc::new(PassThrough),
            wait: Arc::new(PassThrough),
            check_ready: Arc::new(PassThrough),
        }
    }

    pub fn with_mutate(mut self, hook: impl MutateHook<K> + 'static) -> Self {
        self.mutate = Arc::new(hook);
        self
    }

    pub fn with_wait(mut self, hook: impl WaitHook<K> + 'static) -> Self {
        self.wait = Arc::new(hook);
        self
    }

    pub fn with_check_ready(mut self, hook: impl CheckReadyHook<K> + 'static) -> Self {
        self.check_ready = Arc::new(hook);
        self
    }
}

impl<K> Clone for Hooks<K> {
    fn clone(&self) -> Self {
        Self {
            generator: self.generator.clone(),
            mutate: self.mutate.clone(),
            wait: self.wait.clone(),
            check_ready: self.check_ready.clone(),
        }
    }
}
