//! Error types for the reconciler crate.

use kubemirror_core::{ObjectKey, ResourceType};
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A store call failed.
    #[error(transparent)]
    Store(#[from] kubemirror_core::Error),

    /// An object not created from this source occupies the target identity.
    #[error("{type_} '{target}' is not owned by {source_ref}{}", describe_owner(.owner.as_deref()))]
    OwnershipConflict {
        type_: ResourceType,
        target: ObjectKey,
        source_ref: String,
        owner: Option<String>,
    },

    /// The mirror is still being deleted and cannot be written yet.
    #[error("{type_} '{target}' is terminating")]
    MirrorTerminating { type_: ResourceType, target: ObjectKey },

    /// A write found nothing at the target; usually the target namespace
    /// does not exist yet.
    #[error("{type_} '{target}' could not be written: {reason}")]
    TargetMissing {
        type_: ResourceType,
        target: ObjectKey,
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

fn describe_owner(owner: Option<&str>) -> String {
    owner.map_or_else(
        || " (no provenance recorded)".to_string(),
        |o| format!(" (recorded source: {o})"),
    )
}

impl Error {
    /// Create an ownership conflict error.
    pub fn ownership_conflict(
        type_: &ResourceType,
        target: &ObjectKey,
        source_ref: impl Into<String>,
        owner: Option<String>,
    ) -> Self {
        Self::OwnershipConflict {
            type_: type_.clone(),
            target: target.clone(),
            source_ref: source_ref.into(),
            owner,
        }
    }

    /// Create a mirror terminating error.
    pub fn mirror_terminating(type_: &ResourceType, target: &ObjectKey) -> Self {
        Self::MirrorTerminating {
            type_: type_.clone(),
            target: target.clone(),
        }
    }

    /// Create a target missing error.
    pub fn target_missing(type_: &ResourceType, target: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::TargetMissing {
            type_: type_.clone(),
            target: target.clone(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether a later attempt with freshly read state can succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::MirrorTerminating { .. } | Self::TargetMissing { .. } => true,
            Self::OwnershipConflict { .. } | Self::InvalidConfig { .. } => false,
        }
    }
}
