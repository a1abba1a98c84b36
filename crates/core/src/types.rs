//! Object model shared by both clusters.
//!
//! Objects are kept in an erased, structural form: typed identity and
//! metadata, plus a payload that is an ordered map of top-level field names
//! to JSON values. The engine never needs per-type code paths.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level fields of an object body, excluding `apiVersion`, `kind`,
/// `metadata` and `status`.
pub type Payload = serde_json::Map<String, Value>;

/// Fields that never belong to a payload.
pub const RESERVED_FIELDS: [&str; 4] = ["apiVersion", "kind", "metadata", "status"];

/// Resource type identifier (group, version, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    /// API version.
    pub version: String,
    /// Kind.
    pub kind: String,
}

impl ResourceType {
    /// Create a new resource type.
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// The core/v1 Secret type.
    pub fn secret() -> Self {
        Self::new("", "v1", "Secret")
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Split an `apiVersion` string into (group, version).
    pub fn split_api_version(api_version: &str) -> (&str, &str) {
        api_version.split_once('/').unwrap_or(("", api_version))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.kind, self.version)
        } else {
            write!(f, "{}.{}.{}", self.kind, self.version, self.group)
        }
    }
}

/// Namespaced object identity. Also the reconcile key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a new key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference from a dependent to the object that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

/// Object metadata, in the wire shape of the API server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Optimistic concurrency token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set once deletion has been requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
}

/// A resource instance in either cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub type_: ResourceType,
    pub meta: ObjectMeta,
    pub payload: Payload,
}

impl Object {
    /// Create an empty object with the given identity.
    pub fn new(type_: ResourceType, key: &ObjectKey) -> Self {
        Self {
            type_,
            meta: ObjectMeta {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                ..ObjectMeta::default()
            },
            payload: Payload::new(),
        }
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Set a single top-level payload field.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.payload.insert(name.into(), value);
        self
    }

    /// Set a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.labels.insert(key.into(), value.into());
        self
    }

    /// Set an annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.annotations.insert(key.into(), value.into());
        self
    }

    /// Add an owner reference.
    pub fn with_owner(mut self, owner: &Self) -> Self {
        if let Some(uid) = owner.meta.uid.clone() {
            self.meta.owner_references.push(OwnerReference {
                api_version: owner.type_.api_version(),
                kind: owner.type_.kind.clone(),
                name: owner.meta.name.clone(),
                uid,
                controller: None,
                block_owner_deletion: None,
            });
        }
        self
    }

    /// The namespaced identity of this object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.meta.namespace.clone(), self.meta.name.clone())
    }

    /// Whether deletion has been requested.
    pub const fn is_deleting(&self) -> bool {
        self.meta.deletion_timestamp.is_some()
    }

    /// Read a top-level payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Whether `owner_uid` is listed among this object's owners.
    pub fn is_owned_by(&self, owner_uid: &str) -> bool {
        self.meta.owner_references.iter().any(|r| r.uid == owner_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_version() {
        assert_eq!(ResourceType::new("example.com", "v1", "Widget").api_version(), "example.com/v1");
        assert_eq!(ResourceType::secret().api_version(), "v1");
    }

    #[test]
    fn test_split_api_version() {
        assert_eq!(ResourceType::split_api_version("example.com/v1"), ("example.com", "v1"));
        assert_eq!(ResourceType::split_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceType::new("example.com", "v1", "Widget").to_string(), "Widget.v1.example.com");
        assert_eq!(ResourceType::secret().to_string(), "Secret.v1");
        assert_eq!(ObjectKey::new("team-a", "cfg").to_string(), "team-a/cfg");
    }

    #[test]
    fn test_object_builders() {
        let obj = Object::new(ResourceType::secret(), &ObjectKey::new("team-a", "creds"))
            .with_field("type", json!("Opaque"))
            .with_label("app", "demo");

        assert_eq!(obj.key(), ObjectKey::new("team-a", "creds"));
        assert_eq!(obj.field("type"), Some(&json!("Opaque")));
        assert_eq!(obj.meta.labels.get("app").map(String::as_str), Some("demo"));
        assert!(!obj.is_deleting());
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let widget = ResourceType::new("example.com", "v1", "Widget");
        let mut owner = Object::new(widget.clone(), &ObjectKey::new("ns", "owner"));
        let orphan = Object::new(widget.clone(), &ObjectKey::new("ns", "a")).with_owner(&owner);
        assert!(orphan.meta.owner_references.is_empty());

        owner.meta.uid = Some("uid-1".to_string());
        let child = Object::new(widget, &ObjectKey::new("ns", "b")).with_owner(&owner);
        assert!(child.is_owned_by("uid-1"));
    }
}
