//! Create/update/ownership-check/delete primitives shared by the primary
//! mirror and the secret mirrors.
//!
//! Planning is pure: it compares the desired object with what the remote
//! store holds and yields at most one write. Applying the plan performs
//! that write. Every plan is derived from a fresh read, so a retry after
//! any failure starts over from current state.

use std::sync::Arc;

use kubemirror_core::{
    DeleteOptions, Object, ObjectKey, ObjectStore, Propagation, ResourceType, ResultExt,
};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::provenance::{Provenance, SourceRef};
use crate::types::MirrorAction;

/// The single write needed to converge one remote object.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergePlan {
    /// Create the tagged object.
    Create(Object),
    /// Replace the object; carries the observed version token.
    Update(Object),
    /// Nothing to write.
    Noop(MirrorAction),
}

/// The single write needed to remove one owned remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovePlan {
    /// Delete the owned object with this uid.
    Delete { uid: Option<String> },
    /// Nothing to write.
    Noop(MirrorAction),
}

/// Plan convergence of the remote object at `desired`'s identity.
///
/// # Errors
///
/// [`Error::OwnershipConflict`] when a foreign object occupies the target,
/// [`Error::MirrorTerminating`] when the owned mirror is being deleted.
pub fn plan_converge(
    provenance: &Provenance,
    mut desired: Object,
    existing: Option<&Object>,
    source: &SourceRef,
) -> Result<ConvergePlan> {
    let target = desired.key();
    let Some(current) = existing else {
        provenance.tag(&mut desired, source);
        return Ok(ConvergePlan::Create(desired));
    };

    if !provenance.matches(current, source) {
        return Err(Error::ownership_conflict(
            &current.type_,
            &target,
            source.to_string(),
            provenance.source_of(current).map(|owner| owner.to_string()),
        ));
    }
    if current.is_deleting() {
        return Err(Error::mirror_terminating(&current.type_, &target));
    }
    if current.payload == desired.payload {
        return Ok(ConvergePlan::Noop(MirrorAction::Unchanged { target }));
    }

    let mut next = current.clone();
    next.payload = desired.payload;
    provenance.tag(&mut next, source);
    Ok(ConvergePlan::Update(next))
}

/// Plan removal of whatever this source owns at `target`.
pub fn plan_remove(
    provenance: &Provenance,
    target: &ObjectKey,
    existing: Option<&Object>,
    source: &SourceRef,
) -> RemovePlan {
    match existing {
        None => RemovePlan::Noop(MirrorAction::Absent {
            target: target.clone(),
        }),
        Some(current) if !provenance.matches(current, source) => {
            RemovePlan::Noop(MirrorAction::LeftForeign {
                target: target.clone(),
            })
        }
        Some(current) if current.is_deleting() => RemovePlan::Noop(MirrorAction::DeletionPending {
            target: target.clone(),
        }),
        Some(current) => RemovePlan::Delete {
            uid: current.meta.uid.clone(),
        },
    }
}

/// Applies plans against the remote store.
pub struct MirrorWriter {
    remote: Arc<dyn ObjectStore>,
    provenance: Provenance,
    propagation: Propagation,
}

impl MirrorWriter {
    pub fn new(remote: Arc<dyn ObjectStore>, provenance: Provenance, propagation: Propagation) -> Self {
        Self {
            remote,
            provenance,
            propagation,
        }
    }

    pub const fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Make the remote object at `desired`'s identity match it.
    ///
    /// # Errors
    ///
    /// Store failures, ownership conflicts, terminating mirrors and writes
    /// that find no target namespace.
    pub async fn converge(&self, desired: Object, source: &SourceRef) -> Result<MirrorAction> {
        let type_ = desired.type_.clone();
        let target = desired.key();
        let existing = self.remote.get(&type_, &target).await?;

        match plan_converge(&self.provenance, desired, existing.as_ref(), source)? {
            ConvergePlan::Create(object) => {
                self.remote
                    .create(&object)
                    .await
                    .map_err(|e| write_error(e, &type_, &target))?;
                info!(type_ = %type_, target = %target, source = %source, "Created mirror");
                Ok(MirrorAction::Created { target })
            }
            ConvergePlan::Update(object) => {
                self.remote
                    .update(&object)
                    .await
                    .map_err(|e| write_error(e, &type_, &target))?;
                info!(type_ = %type_, target = %target, source = %source, "Updated drifted mirror");
                Ok(MirrorAction::Updated { target })
            }
            ConvergePlan::Noop(action) => {
                debug!(type_ = %type_, action = %action, "Mirror up to date");
                Ok(action)
            }
        }
    }

    /// Delete the object this source owns at `target`, if any.
    ///
    /// # Errors
    ///
    /// Store failures other than the object already being gone.
    pub async fn remove(
        &self,
        type_: &ResourceType,
        target: &ObjectKey,
        source: &SourceRef,
    ) -> Result<MirrorAction> {
        let existing = self.remote.get(type_, target).await?;

        match plan_remove(&self.provenance, target, existing.as_ref(), source) {
            RemovePlan::Delete { uid } => {
                let options = DeleteOptions::new(self.propagation).with_uid(uid);
                let deleted = self.remote.delete(type_, target, &options).await.found()?;
                if deleted.is_none() {
                    return Ok(MirrorAction::Absent {
                        target: target.clone(),
                    });
                }
                info!(
                    type_ = %type_,
                    target = %target,
                    propagation = ?self.propagation,
                    "Deleted mirror"
                );
                Ok(MirrorAction::Deleted {
                    target: target.clone(),
                })
            }
            RemovePlan::Noop(action) => {
                if matches!(action, MirrorAction::LeftForeign { .. }) {
                    debug!(type_ = %type_, target = %target, "Leaving foreign object in place");
                }
                Ok(action)
            }
        }
    }
}

/// NotFound on a write means the target namespace (or the object being
/// replaced) is missing right now, which a later attempt can see differently.
fn write_error(error: kubemirror_core::Error, type_: &ResourceType, target: &ObjectKey) -> Error {
    if error.is_not_found() {
        Error::target_missing(type_, target, error.to_string())
    } else {
        error.into()
    }
}
