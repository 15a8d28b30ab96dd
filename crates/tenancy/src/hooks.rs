use std::sync::Arc;

use async_trait::async_trait;
use converge_core::{DesiredResource, Result};
use converge_kubehub::ResourceStore;
use converge_readiness::ReadinessRegistry;
use converge_reconcile::WaitHook;
use tracing::debug;

use crate::TenantNamespace;

/// Holds namespaced children back until the namespace they live in is ready.
pub struct NamespaceGate {
    store: Arc<dyn ResourceStore>,
    readiness: ReadinessRegistry,
}

impl NamespaceGate {
    pub fn new(store: Arc<dyn ResourceStore>, readiness: ReadinessRegistry) -> Self {
        Self { store, readiness }
    }
}

#[async_trait]
impl WaitHook<TenantNamespace> for NamespaceGate {
    async fn ready_to_persist(&self, _owner: &TenantNamespace, desired: &DesiredResource) -> Result<bool> {
        let ready = self.readiness.namespace_ready(self.store.as_ref(), desired.key()).await?;
        if !ready {
            debug!(resource = %desired.key(), "namespace not ready");
        }
        Ok(ready)
    }
}
