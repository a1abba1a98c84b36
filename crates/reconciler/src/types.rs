//! Core types for the reconciler.

use std::fmt;

use kubemirror_core::ObjectKey;

use crate::error::Error;

/// What one reconcile did to a single remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorAction {
    /// Created the mirror.
    Created { target: ObjectKey },
    /// Replaced a drifted mirror's payload.
    Updated { target: ObjectKey },
    /// Issued a delete for the mirror.
    Deleted { target: ObjectKey },
    /// The mirror is already being deleted.
    DeletionPending { target: ObjectKey },
    /// The mirror already matches.
    Unchanged { target: ObjectKey },
    /// Nothing to mirror and nothing owned at the target.
    Absent { target: ObjectKey },
    /// Nothing to mirror; a foreign object at the target was left alone.
    LeftForeign { target: ObjectKey },
}

impl MirrorAction {
    pub const fn target(&self) -> &ObjectKey {
        match self {
            Self::Created { target }
            | Self::Updated { target }
            | Self::Deleted { target }
            | Self::DeletionPending { target }
            | Self::Unchanged { target }
            | Self::Absent { target }
            | Self::LeftForeign { target } => target,
        }
    }

    /// Whether the action wrote to the remote store.
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Created { .. } | Self::Updated { .. } | Self::Deleted { .. }
        )
    }
}

impl fmt::Display for MirrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
            Self::DeletionPending { .. } => "deletion pending",
            Self::Unchanged { .. } => "unchanged",
            Self::Absent { .. } => "absent",
            Self::LeftForeign { .. } => "left foreign object",
        };
        write!(f, "{verb} {}", self.target())
    }
}

/// Signal returned to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Remote state matches; nothing left to do until the next trigger.
    Converged,
    /// A transient failure; re-run with backoff.
    Retry { reason: String },
    /// A failure that retrying cannot fix; park until the input changes.
    PermanentFailure { reason: String },
}

impl ReconcileOutcome {
    /// Classify an error.
    pub fn from_error(error: &Error) -> Self {
        if error.is_transient() {
            Self::Retry {
                reason: error.to_string(),
            }
        } else {
            Self::PermanentFailure {
                reason: error.to_string(),
            }
        }
    }

    const fn severity(&self) -> u8 {
        match self {
            Self::Converged => 0,
            Self::PermanentFailure { .. } => 1,
            Self::Retry { .. } => 2,
        }
    }

    /// Combine two outcomes. Retry dominates permanent failure, which
    /// dominates convergence.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub const fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Result of one reconcile of one source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The source key.
    pub key: ObjectKey,
    /// What happened to the primary mirror, when it got that far.
    pub mirror: Option<MirrorAction>,
    /// What happened to each configured secret, by secret name.
    pub secrets: Vec<(String, MirrorAction)>,
    /// Combined outcome.
    pub outcome: ReconcileOutcome,
}

impl ReconcileReport {
    /// Number of remote writes issued.
    pub fn writes(&self) -> usize {
        self.mirror
            .iter()
            .chain(self.secrets.iter().map(|(_, action)| action))
            .filter(|action| action.is_write())
            .count()
    }

    /// Whether the remote state for this key converged.
    pub const fn converged(&self) -> bool {
        self.outcome.is_converged()
    }
}
