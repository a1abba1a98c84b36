//! Conversion between the structural object model and `DynamicObject`.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kubemirror_core::{Error, Object, ResourceType, Result, TypeInfo, TypeRegistry};
use serde_json::Value;

/// API addressing for a registered type.
pub fn api_resource(type_: &ResourceType, info: &TypeInfo) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&type_.group, &type_.version, &type_.kind);
    ApiResource::from_gvk_with_plural(&gvk, &info.plural)
}

/// Encode an object for the API server.
///
/// # Errors
///
/// Fails when the type is not registered or the body does not form a valid
/// object.
pub fn to_dynamic(registry: &TypeRegistry, object: &Object) -> Result<DynamicObject> {
    let body = registry.encode(object)?;
    serde_json::from_value(body).map_err(|e| Error::invalid_object(e.to_string()))
}

/// Decode an object returned by the API server.
///
/// List items usually come without `apiVersion` and `kind`; those are taken
/// from the type that was queried.
///
/// # Errors
///
/// Fails when the body cannot be decoded into a registered type.
pub fn from_dynamic(registry: &TypeRegistry, type_: &ResourceType, object: DynamicObject) -> Result<Object> {
    let mut body = serde_json::to_value(&object).map_err(|e| Error::invalid_object(e.to_string()))?;
    if let Value::Object(fields) = &mut body {
        fields
            .entry("apiVersion")
            .or_insert_with(|| Value::String(type_.api_version()));
        fields
            .entry("kind")
            .or_insert_with(|| Value::String(type_.kind.clone()));
    }
    registry.decode(body)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use kubemirror_core::ObjectKey;
    use serde_json::json;

    fn widget() -> ResourceType {
        ResourceType::new("example.com", "v1", "Widget")
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::with_builtins().with_type(widget(), TypeInfo::namespaced("widgets"))
    }

    #[test]
    fn test_api_resource_addressing() {
        let resource = api_resource(&widget(), &TypeInfo::namespaced("widgets"));
        assert_eq!(resource.api_version, "example.com/v1");
        assert_eq!(resource.plural, "widgets");
        assert_eq!(resource.kind, "Widget");

        let secret = api_resource(&ResourceType::secret(), &TypeInfo::namespaced("secrets"));
        assert_eq!(secret.api_version, "v1");
    }

    #[test]
    fn test_to_dynamic_carries_payload() {
        let object = Object::new(widget(), &ObjectKey::new("team-a-mirror", "cfg-copy"))
            .with_field("spec", json!({"replicas": 3}))
            .with_label("kubemirror.io/managed-by", "Widget.v1.example.com");

        let dynamic = to_dynamic(&registry(), &object).unwrap();
        assert_eq!(dynamic.metadata.name.as_deref(), Some("cfg-copy"));
        assert_eq!(dynamic.metadata.namespace.as_deref(), Some("team-a-mirror"));
        assert_eq!(dynamic.data["spec"], json!({"replicas": 3}));
    }

    #[test]
    fn test_from_dynamic_fills_missing_type() {
        let item: DynamicObject = serde_json::from_value(json!({
            "metadata": {
                "name": "cfg",
                "namespace": "team-a",
                "uid": "6f1c",
                "resourceVersion": "42",
                "creationTimestamp": "2024-01-01T00:00:00Z"
            },
            "spec": {"replicas": 3},
            "status": {"ready": true}
        }))
        .unwrap();

        let object = from_dynamic(&registry(), &widget(), item).unwrap();
        assert_eq!(object.type_, widget());
        assert_eq!(object.key(), ObjectKey::new("team-a", "cfg"));
        assert_eq!(object.meta.resource_version.as_deref(), Some("42"));
        assert_eq!(object.field("spec"), Some(&json!({"replicas": 3})));
        assert!(object.field("status").is_none());
    }

    #[test]
    fn test_unregistered_type_is_rejected() {
        let gadget = ResourceType::new("example.com", "v1", "Gadget");
        let object = Object::new(gadget, &ObjectKey::new("a", "b"));
        assert!(matches!(
            to_dynamic(&registry(), &object),
            Err(Error::UnregisteredType { .. })
        ));
    }
}
