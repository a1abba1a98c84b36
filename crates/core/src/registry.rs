//! Explicit resource type registry.
//!
//! Maps resource type identifiers to the API metadata needed to address
//! them, and converts objects between their structural form and wire JSON.
//! Built once at startup and shared by reference.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::Error;
use crate::result::Result;
use crate::types::{Object, ObjectMeta, Payload, RESERVED_FIELDS, ResourceType};

/// API metadata for a registered resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Lowercase plural resource name used in API paths.
    pub plural: String,
    /// Whether instances live in a namespace.
    pub namespaced: bool,
}

impl TypeInfo {
    /// A namespaced resource with the given plural name.
    pub fn namespaced(plural: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            namespaced: true,
        }
    }
}

/// Registry of resource types known to this process.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<ResourceType, TypeInfo>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with core/v1 Secret registered.
    pub fn with_builtins() -> Self {
        Self::new().with_type(ResourceType::secret(), TypeInfo::namespaced("secrets"))
    }

    /// Register a type, builder style.
    pub fn with_type(mut self, type_: ResourceType, info: TypeInfo) -> Self {
        self.register(type_, info);
        self
    }

    /// Register a type, replacing any previous entry.
    pub fn register(&mut self, type_: ResourceType, info: TypeInfo) {
        tracing::debug!(type_ = %type_, plural = %info.plural, "Registering resource type");
        self.types.insert(type_, info);
    }

    /// Look up a registered type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredType`] when the type is unknown.
    pub fn resolve(&self, type_: &ResourceType) -> Result<&TypeInfo> {
        self.types
            .get(type_)
            .ok_or_else(|| Error::unregistered_type(type_))
    }

    /// Whether a type is registered.
    pub fn contains(&self, type_: &ResourceType) -> bool {
        self.types.contains_key(type_)
    }

    /// Convert an object into wire JSON.
    ///
    /// # Errors
    ///
    /// Fails when the object's type is not registered.
    pub fn encode(&self, object: &Object) -> Result<Value> {
        self.resolve(&object.type_)?;

        let metadata = serde_json::to_value(&object.meta)
            .map_err(|e| Error::invalid_object(format!("metadata: {e}")))?;

        let mut body = Map::new();
        body.insert("apiVersion".to_string(), Value::String(object.type_.api_version()));
        body.insert("kind".to_string(), Value::String(object.type_.kind.clone()));
        body.insert("metadata".to_string(), metadata);
        object
            .payload
            .iter()
            .filter(|(field, _)| !RESERVED_FIELDS.contains(&field.as_str()))
            .for_each(|(field, value)| {
                body.insert(field.clone(), value.clone());
            });

        Ok(Value::Object(body))
    }

    /// Convert wire JSON into an object.
    ///
    /// # Errors
    ///
    /// Fails when the body is not a JSON object, lacks `apiVersion`/`kind`,
    /// has malformed metadata, or names an unregistered type.
    pub fn decode(&self, value: Value) -> Result<Object> {
        let Value::Object(mut body) = value else {
            return Err(Error::invalid_object("body is not a JSON object"));
        };

        let api_version = take_string(&mut body, "apiVersion")?;
        let kind = take_string(&mut body, "kind")?;
        let (group, version) = ResourceType::split_api_version(&api_version);
        let type_ = ResourceType::new(group, version, kind);
        self.resolve(&type_)?;

        let meta: ObjectMeta = match body.remove("metadata") {
            Some(metadata) => serde_json::from_value(metadata)
                .map_err(|e| Error::invalid_object(format!("metadata: {e}")))?,
            None => return Err(Error::invalid_object("missing metadata")),
        };

        body.remove("status");
        let payload: Payload = body;

        Ok(Object {
            type_,
            meta,
            payload,
        })
    }
}

fn take_string(body: &mut Map<String, Value>, field: &str) -> Result<String> {
    match body.remove(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(Error::invalid_object(format!("missing or empty '{field}'"))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::ObjectKey;
    use serde_json::json;

    fn widget() -> ResourceType {
        ResourceType::new("example.com", "v1", "Widget")
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::with_builtins().with_type(widget(), TypeInfo::namespaced("widgets"))
    }

    #[test]
    fn test_builtins_include_secret() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry.contains(&ResourceType::secret()));
        assert_eq!(registry.resolve(&ResourceType::secret()).map(|i| i.plural.as_str()), Ok("secrets"));
    }

    #[test]
    fn test_resolve_unregistered() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.resolve(&widget()), Err(Error::unregistered_type(&widget())));
    }

    #[test]
    fn test_decode_drops_status_and_keeps_payload() {
        let body = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {
                "namespace": "team-a",
                "name": "cfg",
                "resourceVersion": "42",
                "uid": "abc",
                "creationTimestamp": "2024-01-01T00:00:00Z"
            },
            "spec": {"replicas": 3},
            "status": {"ready": true}
        });

        let object = registry().decode(body).unwrap();
        assert_eq!(object.type_, widget());
        assert_eq!(object.key(), ObjectKey::new("team-a", "cfg"));
        assert_eq!(object.meta.resource_version.as_deref(), Some("42"));
        assert_eq!(object.field("spec"), Some(&json!({"replicas": 3})));
        assert!(object.field("status").is_none());
    }

    #[test]
    fn test_owner_reference_flags_survive_decode_and_encode() {
        let owner = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "name": "o",
            "uid": "u",
            "controller": true,
            "blockOwnerDeletion": true
        });
        let body = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"namespace": "team-a", "name": "cfg", "ownerReferences": [owner.clone()]},
            "spec": {"replicas": 3}
        });

        let object = registry().decode(body).unwrap();
        let reference = &object.meta.owner_references[0];
        assert_eq!(reference.controller, Some(true));
        assert_eq!(reference.block_owner_deletion, Some(true));

        let encoded = registry().encode(&object).unwrap();
        assert_eq!(encoded["metadata"]["ownerReferences"], json!([owner]));
    }

    #[test]
    fn test_decode_rejects_unregistered_kind() {
        let body = json!({
            "apiVersion": "other.io/v2",
            "kind": "Gadget",
            "metadata": {"namespace": "ns", "name": "g"}
        });
        assert!(matches!(registry().decode(body), Err(Error::UnregisteredType { .. })));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(registry().decode(json!([1, 2])), Err(Error::InvalidObject { .. })));
    }

    #[test]
    fn test_encode_secret() {
        let secret = Object::new(ResourceType::secret(), &ObjectKey::new("team-a", "creds"))
            .with_field("type", json!("Opaque"))
            .with_field("data", json!({"token": "c2VjcmV0"}))
            .with_annotation("note", "x");

        let value = registry().encode(&secret).unwrap();
        assert_eq!(value["apiVersion"], json!("v1"));
        assert_eq!(value["kind"], json!("Secret"));
        assert_eq!(value["metadata"]["namespace"], json!("team-a"));
        assert_eq!(value["metadata"]["annotations"]["note"], json!("x"));
        assert_eq!(value["data"]["token"], json!("c2VjcmV0"));
        assert!(value["metadata"].get("uid").is_none());
    }

    #[test]
    fn test_encode_unregistered_fails() {
        let object = Object::new(ResourceType::new("x.io", "v1", "Thing"), &ObjectKey::new("a", "b"));
        assert!(registry().encode(&object).is_err());
    }
}
