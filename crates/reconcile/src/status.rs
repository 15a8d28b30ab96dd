use std::sync::Arc;

use converge_core::{OwnerStatus, ResourceKey, Result};
use converge_kubehub::ResourceStore;
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info};

/// Writes the owner status through the status subresource, once per reconcile.
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn ResourceStore>,
    field_manager: String,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn ResourceStore>, field_manager: impl Into<String>) -> Self {
        Self { store, field_manager: field_manager.into() }
    }

    /// Persist `after` onto `owner` (as fetched at the start of the reconcile)
    /// when it differs from `before`. Returns whether a write happened; an
    /// optimistic-lock conflict is logged and reported as no write.
    pub async fn flush(&self, key: &ResourceKey, owner: &Json, before: &OwnerStatus, after: &OwnerStatus) -> Result<bool> {
        if before == after {
            debug!(owner = %key, "status unchanged");
            return Ok(false);
        }
        let mut obj = owner.clone();
        if let Some(root) = obj.as_object_mut() {
            root.insert("status".into(), serde_json::to_value(after)?);
        }
        match self.store.update_status(key, &obj, &self.field_manager).await {
            Ok(_) => {
                counter!("reconcile_status_writes", 1u64);
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                info!(owner = %key, error = %e, "owner changed before status write; skipping");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
