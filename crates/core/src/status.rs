//! Owner status model and the upsert-by-key discipline for its condition lists.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Clock, ResourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PhaseState {
    Pending,
    Complete,
    Failed,
}

/// Outcome of one named phase of the reconcile pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCondition {
    pub phase: String,
    pub state: PhaseState,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl PhaseCondition {
    pub fn complete(phase: &str) -> Self {
        Self { phase: phase.to_string(), state: PhaseState::Complete, message: "phase completed".into(), last_modified: None }
    }

    pub fn pending(phase: &str) -> Self {
        Self { phase: phase.to_string(), state: PhaseState::Pending, message: "phase pending".into(), last_modified: None }
    }

    pub fn failed(phase: &str, error: &dyn std::error::Error) -> Self {
        Self {
            phase: phase.to_string(),
            state: PhaseState::Failed,
            message: format!("phase failed: {}", error),
            last_modified: None,
        }
    }
}

/// Progress of one child resource through the resource sub-phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCondition {
    #[serde(flatten)]
    pub resource: ResourceKey,
    #[serde(default)]
    pub last_resource_phase: String,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl ResourceCondition {
    pub fn new(resource: ResourceKey, last_resource_phase: &str, created: bool, message: impl Into<String>) -> Self {
        Self {
            resource,
            last_resource_phase: last_resource_phase.to_string(),
            created,
            message: message.into(),
            last_modified: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OwnerStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub dependencies_satisfied: bool,
    #[serde(default)]
    pub conditions: Vec<PhaseCondition>,
    #[serde(default)]
    pub resources: Vec<ResourceCondition>,
}

/// Entry in a keyed condition list.
trait Keyed: Clone + PartialEq {
    type Key: PartialEq;
    fn key(&self) -> &Self::Key;
    fn last_modified_mut(&mut self) -> &mut Option<String>;
}

impl Keyed for PhaseCondition {
    type Key = String;
    fn key(&self) -> &String {
        &self.phase
    }
    fn last_modified_mut(&mut self) -> &mut Option<String> {
        &mut self.last_modified
    }
}

impl Keyed for ResourceCondition {
    type Key = ResourceKey;
    fn key(&self) -> &ResourceKey {
        &self.resource
    }
    fn last_modified_mut(&mut self) -> &mut Option<String> {
        &mut self.last_modified
    }
}

/// Overwrite the entry with the same key or append. Returns whether the list changed.
fn upsert<T: Keyed>(list: &mut Vec<T>, mut item: T, clock: &dyn Clock) -> bool {
    match list.iter_mut().find(|c| c.key() == item.key()) {
        Some(existing) => {
            let mut a = existing.clone();
            let mut b = item.clone();
            *a.last_modified_mut() = None;
            *b.last_modified_mut() = None;
            if a == b && item.last_modified_mut().is_none() {
                return false;
            }
            if item.last_modified_mut().is_none() {
                *item.last_modified_mut() = Some(clock.timestamp());
            }
            *existing = item;
            true
        }
        None => {
            if item.last_modified_mut().is_none() {
                *item.last_modified_mut() = Some(clock.timestamp());
            }
            list.push(item);
            true
        }
    }
}

impl OwnerStatus {
    pub fn set_phase_condition(&mut self, condition: PhaseCondition, clock: &dyn Clock) -> bool {
        upsert(&mut self.conditions, condition, clock)
    }

    pub fn set_resource_condition(&mut self, condition: ResourceCondition, clock: &dyn Clock) -> bool {
        upsert(&mut self.resources, condition, clock)
    }

    pub fn phase_condition(&self, phase: &str) -> Option<&PhaseCondition> {
        self.conditions.iter().find(|c| c.phase == phase)
    }

    pub fn resource_condition(&self, key: &ResourceKey) -> Option<&ResourceCondition> {
        self.resources.iter().find(|c| &c.resource == key)
    }
}
