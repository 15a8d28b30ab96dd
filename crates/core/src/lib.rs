//! Converge core types: resource identity, desired descriptors, owner status and errors.

#![forbid(unsafe_code)]

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod clock;
pub mod error;
pub mod status;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ConvergeError, Result};
pub use status::{OwnerStatus, PhaseCondition, PhaseState, ResourceCondition};

/// Group/Version/Kind triple. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self { group: group.to_string(), version: version.to_string(), kind: kind.to_string() }
    }

    /// Split an `apiVersion` string (`v1` or `apps/v1`) and pair it with a kind.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// `v1/Kind` or `group/v1/Kind`.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gvk_key())
    }
}

/// Identity of a resource: (group, version, kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKey {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn new(gvk: &Gvk, namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string()),
            name: name.to_string(),
        }
    }

    pub fn gvk(&self) -> Gvk {
        Gvk::new(&self.group, &self.version, &self.kind)
    }

    pub fn api_version(&self) -> String {
        self.gvk().api_version()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.gvk(), ns, self.name),
            None => write!(f, "{}/{}", self.gvk(), self.name),
        }
    }
}

/// Back-reference from a child to the object that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub gvk: Gvk,
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
}

impl OwnerRef {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.gvk, self.namespace.as_deref(), &self.name)
    }

    /// Render as a `metadata.ownerReferences` entry marking this owner as the controller.
    pub fn to_reference(&self) -> Json {
        serde_json::json!({
            "apiVersion": self.gvk.api_version(),
            "kind": self.gvk.kind,
            "name": self.name,
            "uid": self.uid,
            "controller": true,
            "blockOwnerDeletion": true,
        })
    }
}

/// A lower-level object the owner needs, described as a full manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesiredResource {
    key: ResourceKey,
    body: Json,
}

impl DesiredResource {
    /// Build a descriptor from a manifest, deriving its identity from `apiVersion`,
    /// `kind`, `metadata.name` and `metadata.namespace`.
    pub fn from_manifest(body: Json) -> Result<Self> {
        if !body.is_object() {
            return Err(ConvergeError::Validation("manifest must be an object".into()));
        }
        let api_version = body
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConvergeError::Validation("manifest missing apiVersion".into()))?;
        let kind = body
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConvergeError::Validation("manifest missing kind".into()))?;
        let meta = body.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConvergeError::Validation("manifest missing metadata.name".into()))?;
        let namespace = meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str());
        let key = ResourceKey::new(&Gvk::from_api_version(api_version, kind), namespace, name);
        Ok(Self { key, body })
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn kind(&self) -> &str {
        &self.key.kind
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.key.namespace()
    }

    pub fn body(&self) -> &Json {
        &self.body
    }

    pub fn into_body(self) -> Json {
        self.body
    }

    /// Attach `owner` as the controlling owner reference, replacing any entry with the same uid.
    pub fn set_owner_reference(&mut self, owner: &OwnerRef) {
        let Some(root) = self.body.as_object_mut() else { return };
        let meta = root.entry("metadata").or_insert_with(|| Json::Object(serde_json::Map::new()));
        let Some(meta) = meta.as_object_mut() else { return };
        let refs = meta.entry("ownerReferences").or_insert_with(|| Json::Array(Vec::new()));
        if !refs.is_array() {
            *refs = Json::Array(Vec::new());
        }
        if let Some(list) = refs.as_array_mut() {
            list.retain(|r| r.get("uid").and_then(|u| u.as_str()) != Some(owner.uid.as_str()));
            list.push(owner.to_reference());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gvk_parses_core_and_grouped_api_versions() {
        let core = Gvk::from_api_version("v1", "Namespace");
        assert_eq!(core.group, "");
        assert_eq!(core.gvk_key(), "v1/Namespace");
        let apps = Gvk::from_api_version("apps/v1", "Deployment");
        assert_eq!(apps.group, "apps");
        assert_eq!(apps.api_version(), "apps/v1");
        assert_eq!(apps.to_string(), "apps/v1/Deployment");
    }

    #[test]
    fn manifest_errors_are_friendly() {
        let e1 = DesiredResource::from_manifest(json!({"kind": "Foo", "metadata": {"name": "x"}}))
            .unwrap_err()
            .to_string();
        assert!(e1.contains("missing apiVersion"), "e1={}", e1);

        let e2 = DesiredResource::from_manifest(json!({"apiVersion": "v1", "metadata": {"name": "x"}}))
            .unwrap_err()
            .to_string();
        assert!(e2.contains("missing kind"), "e2={}", e2);

        let e3 = DesiredResource::from_manifest(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}}))
            .unwrap_err()
            .to_string();
        assert!(e3.contains("missing metadata.name"), "e3={}", e3);
    }

    #[test]
    fn manifest_identity_includes_namespace() {
        let d = DesiredResource::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "LimitRange",
            "metadata": {"name": "limits", "namespace": "team-a"}
        }))
        .unwrap();
        assert_eq!(d.key().to_string(), "v1/LimitRange/team-a/limits");
        assert_eq!(d.namespace(), Some("team-a"));

        let ns = DesiredResource::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "team-a", "namespace": ""}
        }))
        .unwrap();
        assert_eq!(ns.namespace(), None);
    }

    #[test]
    fn owner_reference_is_replaced_not_duplicated() {
        let owner = OwnerRef {
            gvk: Gvk::new("tenancy.converge.dev", "v1alpha1", "TenantNamespace"),
            namespace: None,
            name: "team-a".into(),
            uid: "1234".into(),
        };
        let mut d = DesiredResource::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "team-a"}
        }))
        .unwrap();
        d.set_owner_reference(&owner);
        d.set_owner_reference(&owner);
        let refs = d.body()["metadata"]["ownerReferences"].as_array().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0]["apiVersion"], "tenancy.converge.dev/v1alpha1");
        assert_eq!(refs[0]["controller"], true);
        assert_eq!(refs[0]["blockOwnerDeletion"], true);
    }
}
