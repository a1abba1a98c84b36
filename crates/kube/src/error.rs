//! Error types for the Kubernetes port.

use std::path::{Path, PathBuf};

use kubemirror_core::{ObjectKey, ResourceType};
use thiserror::Error;

/// Result type alias for bootstrap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while connecting to a cluster or discovering types.
#[derive(Debug, Error)]
pub enum Error {
    /// The kubeconfig file could not be read or interpreted.
    #[error("failed to load kubeconfig {path}: {reason}")]
    Kubeconfig { path: PathBuf, reason: String },

    /// The client could not be constructed.
    #[error("failed to create client: {reason}")]
    Client { reason: String },

    /// The API server does not serve the type.
    #[error("failed to discover {type_}: {reason}")]
    Discovery { type_: ResourceType, reason: String },

    /// Only namespaced types can be mirrored.
    #[error("{type_} is cluster-scoped")]
    ClusterScoped { type_: ResourceType },

    #[error(transparent)]
    Store(#[from] kubemirror_core::Error),
}

impl Error {
    pub fn kubeconfig(path: &Path, reason: impl Into<String>) -> Self {
        Self::Kubeconfig {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn client(reason: impl Into<String>) -> Self {
        Self::Client {
            reason: reason.into(),
        }
    }

    pub fn discovery(type_: &ResourceType, reason: impl Into<String>) -> Self {
        Self::Discovery {
            type_: type_.clone(),
            reason: reason.into(),
        }
    }
}

/// Map an API status onto the store error taxonomy.
pub fn from_status(
    code: u16,
    reason: &str,
    message: &str,
    type_: &ResourceType,
    key: &ObjectKey,
) -> kubemirror_core::Error {
    use kubemirror_core::Error as StoreError;

    match code {
        404 => StoreError::not_found(type_, key),
        409 if reason == "AlreadyExists" => StoreError::already_exists(type_, key),
        409 => StoreError::conflict(type_, key, message),
        429 => StoreError::throttled(message),
        500..=599 => StoreError::unavailable(format!("{code} {reason}: {message}")),
        _ => StoreError::rejected(format!("{code} {reason}: {message}")),
    }
}

/// Map a client error onto the store error taxonomy.
///
/// Anything that is not an API status or a decoding failure happened on the
/// way to the server and is treated as unavailability.
pub fn store_error(error: kube::Error, type_: &ResourceType, key: &ObjectKey) -> kubemirror_core::Error {
    match error {
        kube::Error::Api(response) => from_status(
            response.code,
            &response.reason,
            &response.message,
            type_,
            key,
        ),
        kube::Error::SerdeError(e) => kubemirror_core::Error::invalid_object(e.to_string()),
        other => kubemirror_core::Error::unavailable(other.to_string()),
    }
}
