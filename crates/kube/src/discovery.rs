//! Resolution of the mirrored type's API metadata.

use kube::api::GroupVersionKind;
use kube::discovery::{self, Scope};
use kube::Client;
use kubemirror_core::{ResourceType, TypeInfo, TypeRegistry};
use tracing::info;

use crate::error::{Error, Result};

/// Accept a discovered type only when it is namespaced.
pub fn namespaced_info(type_: &ResourceType, plural: String, scope: &Scope) -> Result<TypeInfo> {
    match scope {
        Scope::Namespaced => Ok(TypeInfo::namespaced(plural)),
        Scope::Cluster => Err(Error::ClusterScoped {
            type_: type_.clone(),
        }),
    }
}

/// Register `type_` in `registry`, asking the API server for its plural
/// name unless one is given.
///
/// # Errors
///
/// Fails when the server does not serve the type or the type is
/// cluster-scoped.
pub async fn discover(
    client: &Client,
    registry: &mut TypeRegistry,
    type_: &ResourceType,
    plural: Option<&str>,
) -> Result<TypeInfo> {
    let info = match plural {
        Some(plural) => TypeInfo::namespaced(plural),
        None => {
            let gvk = GroupVersionKind::gvk(&type_.group, &type_.version, &type_.kind);
            let (resource, capabilities) = discovery::pinned_kind(client, &gvk)
                .await
                .map_err(|e| Error::discovery(type_, e.to_string()))?;
            namespaced_info(type_, resource.plural, &capabilities.scope)?
        }
    };

    info!(type_ = %type_, plural = %info.plural, "Resolved resource type");
    registry.register(type_.clone(), info.clone());
    Ok(info)
}
