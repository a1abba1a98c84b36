//! Core error types for kubemirror store and configuration operations.
//!
//! Every variant carries enough context to be logged on its own. Callers
//! decide whether to retry with [`Error::is_transient`].

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ObjectKey, ResourceType};

/// Core error type for store, registry and configuration operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // Store errors
    #[error("{type_} '{key}' not found")]
    NotFound { type_: ResourceType, key: ObjectKey },

    #[error("{type_} '{key}' already exists")]
    AlreadyExists { type_: ResourceType, key: ObjectKey },

    #[error("conflict writing {type_} '{key}': {reason}")]
    Conflict {
        type_: ResourceType,
        key: ObjectKey,
        reason: String,
    },

    #[error("request throttled: {reason}")]
    Throttled { reason: String },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("request rejected: {reason}")]
    Rejected { reason: String },

    // Registry errors
    #[error("resource type {type_} is not registered")]
    UnregisteredType { type_: ResourceType },

    #[error("invalid object: {reason}")]
    InvalidObject { reason: String },

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(type_: &ResourceType, key: &ObjectKey) -> Self {
        Self::NotFound {
            type_: type_.clone(),
            key: key.clone(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(type_: &ResourceType, key: &ObjectKey) -> Self {
        Self::AlreadyExists {
            type_: type_.clone(),
            key: key.clone(),
        }
    }

    /// Create a version or precondition conflict error.
    pub fn conflict(type_: &ResourceType, key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Conflict {
            type_: type_.clone(),
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create a throttled error.
    pub fn throttled(reason: impl Into<String>) -> Self {
        Self::Throttled {
            reason: reason.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a rejected error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Create an unregistered type error.
    pub fn unregistered_type(type_: &ResourceType) -> Self {
        Self::UnregisteredType {
            type_: type_.clone(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid_object(reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request later can succeed.
    ///
    /// `NotFound` is not transient: callers treat it as an observed state,
    /// not a failure.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. }
                | Self::Conflict { .. }
                | Self::Throttled { .. }
                | Self::Unavailable { .. }
        )
    }

    /// Whether this error reports a missing object.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> ResourceType {
        ResourceType::new("example.com", "v1", "Widget")
    }

    #[test]
    fn test_error_display() {
        let err = Error::conflict(&widget(), &ObjectKey::new("team-a", "cfg"), "stale version");
        let message = err.to_string();
        assert!(message.contains("team-a/cfg"));
        assert!(message.contains("stale version"));
    }

    #[test]
    fn test_transient_classification() {
        let key = ObjectKey::new("team-a", "cfg");
        assert!(Error::conflict(&widget(), &key, "x").is_transient());
        assert!(Error::already_exists(&widget(), &key).is_transient());
        assert!(Error::throttled("slow down").is_transient());
        assert!(Error::unavailable("connection reset").is_transient());

        assert!(!Error::not_found(&widget(), &key).is_transient());
        assert!(!Error::unregistered_type(&widget()).is_transient());
        assert!(!Error::rejected("forbidden").is_transient());
        assert!(!Error::invalid_object("missing kind").is_transient());
    }
}
