//! Mirroring of a fixed set of named secrets per source namespace.
//!
//! Secret mirrors record the local secret itself as their source, so every
//! source object in a namespace converges the same mirrors without
//! contending for ownership.

use std::sync::Arc;

use kubemirror_core::{Object, ObjectKey, ObjectStore, ResourceType};
use tracing::warn;

use crate::converge::MirrorWriter;
use crate::error::Result;
use crate::provenance::SourceRef;
use crate::transform::NameTransformer;
use crate::types::{MirrorAction, ReconcileOutcome};

/// Converges the secret mirrors of one namespace at a time.
pub struct SecretMirror {
    local: Arc<dyn ObjectStore>,
    writer: Arc<MirrorWriter>,
    transformer: NameTransformer,
    secret_names: Vec<String>,
    secret_type: ResourceType,
}

impl SecretMirror {
    pub fn new(
        local: Arc<dyn ObjectStore>,
        writer: Arc<MirrorWriter>,
        transformer: NameTransformer,
        secret_names: Vec<String>,
    ) -> Self {
        Self {
            local,
            writer,
            transformer,
            secret_names,
            secret_type: ResourceType::secret(),
        }
    }

    /// Configured secret names.
    pub fn secret_names(&self) -> &[String] {
        &self.secret_names
    }

    /// Whether `name` is one of the configured secrets.
    pub fn is_mirrored(&self, name: &str) -> bool {
        self.secret_names.iter().any(|n| n == name)
    }

    /// Converge every configured secret of `namespace`.
    ///
    /// When `active` is false the namespace has no live source objects and
    /// every owned secret mirror is removed. Each secret is handled on its
    /// own; one failure does not stop the others.
    pub async fn sync_namespace(
        &self,
        namespace: &str,
        active: bool,
    ) -> (Vec<(String, MirrorAction)>, ReconcileOutcome) {
        let mut actions = Vec::with_capacity(self.secret_names.len());
        let mut outcome = ReconcileOutcome::Converged;

        for name in &self.secret_names {
            match self.sync_one(namespace, name, active).await {
                Ok(action) => actions.push((name.clone(), action)),
                Err(e) => {
                    warn!(namespace, secret = %name, error = %e, "Secret mirror failed");
                    outcome = outcome.merge(ReconcileOutcome::from_error(&e));
                }
            }
        }

        (actions, outcome)
    }

    async fn sync_one(&self, namespace: &str, name: &str, active: bool) -> Result<MirrorAction> {
        let source = SourceRef::new(
            self.secret_type.kind.clone(),
            ObjectKey::new(namespace, name),
        );
        let target = self.transformer.secret_target_key(namespace, name);

        let present = if active {
            self.local
                .get(&self.secret_type, &source.key)
                .await?
                .filter(|secret| !secret.is_deleting())
        } else {
            None
        };

        match present {
            Some(secret) => {
                let desired = Object::new(self.secret_type.clone(), &target).with_payload(secret.payload);
                self.writer.converge(desired, &source).await
            }
            None => self.writer.remove(&self.secret_type, &target, &source).await,
        }
    }
}
