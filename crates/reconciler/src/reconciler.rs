//! Reconciler implementation.
//!
//! One invocation converges the remote state derived from one source key.
//! Nothing is remembered between invocations: every decision comes from
//! reading both clusters again, which makes duplicate and out-of-order
//! triggers harmless.

use std::sync::Arc;

use async_trait::async_trait;
use kubemirror_core::{MirrorConfig, Object, ObjectKey, ObjectStore, ResourceType, TypeRegistry};
use tracing::{debug, error, info, warn};

use crate::converge::MirrorWriter;
use crate::error::{Error, Result};
use crate::r#loop::KeyReconciler;
use crate::provenance::{Provenance, SourceRef};
use crate::queue::WorkQueue;
use crate::secrets::SecretMirror;
use crate::transform::NameTransformer;
use crate::triggers::EventRouter;
use crate::types::{MirrorAction, ReconcileOutcome, ReconcileReport};

/// Reconciliation engine for one mirrored resource type.
pub struct Reconciler {
    /// Local cluster port.
    local: Arc<dyn ObjectStore>,
    /// Registered resource types.
    registry: Arc<TypeRegistry>,
    /// Mirrored resource type.
    resource: ResourceType,
    /// Naming and scope rules.
    transformer: NameTransformer,
    /// Remote writes with ownership checks.
    writer: Arc<MirrorWriter>,
    /// Secret mirrors.
    secrets: SecretMirror,
}

impl Reconciler {
    /// Start building a reconciler.
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    /// Converge the remote state for one source key.
    ///
    /// Never fails: errors are folded into the report's outcome.
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileReport {
        debug!(key = %key, "Starting reconciliation");

        let report = match self.local.get(&self.resource, key).await {
            Ok(source) => self.converge_key(key, source).await,
            Err(e) => ReconcileReport {
                key: key.clone(),
                mirror: None,
                secrets: Vec::new(),
                outcome: ReconcileOutcome::from_error(&e.into()),
            },
        };

        match &report.outcome {
            ReconcileOutcome::Converged => {
                if report.writes() > 0 {
                    info!(key = %key, writes = report.writes(), "Reconciliation complete");
                } else {
                    debug!(key = %key, "System converged");
                }
            }
            ReconcileOutcome::Retry { reason } => {
                warn!(key = %key, reason = %reason, "Reconciliation will be retried");
            }
            ReconcileOutcome::PermanentFailure { reason } => {
                error!(key = %key, reason = %reason, "Reconciliation failed permanently");
            }
        }

        report
    }

    async fn converge_key(&self, key: &ObjectKey, source: Option<Object>) -> ReconcileReport {
        let source_ref = SourceRef::new(self.resource.kind.clone(), key.clone());
        let live = source.filter(|s| self.is_live(s));
        let source_live = live.is_some();

        let mirror_result = match live {
            Some(source) => self.writer.converge(self.desired_mirror(source), &source_ref).await,
            None => {
                let target = self.transformer.target_key(key);
                self.writer.remove(&self.resource, &target, &source_ref).await
            }
        };

        let (mirror, mut outcome) = match mirror_result {
            Ok(action) => (Some(action), ReconcileOutcome::Converged),
            Err(e) => (None, ReconcileOutcome::from_error(&e)),
        };

        let mut secrets = Vec::new();
        if !self.secrets.secret_names().is_empty() {
            match self.namespace_active(&key.namespace, source_live).await {
                Ok(active) => {
                    let (actions, secret_outcome) =
                        self.secrets.sync_namespace(&key.namespace, active).await;
                    secrets = actions;
                    outcome = outcome.merge(secret_outcome);
                }
                Err(e) => outcome = outcome.merge(ReconcileOutcome::from_error(&e)),
            }
        }

        ReconcileReport {
            key: key.clone(),
            mirror,
            secrets,
            outcome,
        }
    }

    /// Present, in scope and not being deleted.
    fn is_live(&self, source: &Object) -> bool {
        self.transformer.eligible(&source.meta.namespace) && !source.is_deleting()
    }

    /// The mirror a live source should have. Takes the source by value so
    /// the mirror owns its payload outright.
    fn desired_mirror(&self, source: Object) -> Object {
        let target = self.transformer.target_key(&source.key());
        Object::new(self.resource.clone(), &target).with_payload(source.payload)
    }

    /// Whether the namespace still holds a live source object.
    async fn namespace_active(&self, namespace: &str, source_live: bool) -> Result<bool> {
        if !self.transformer.eligible(namespace) {
            return Ok(false);
        }
        if source_live {
            return Ok(true);
        }
        let sources = self.local.list(&self.resource, namespace).await?;
        Ok(sources.iter().any(|s| !s.is_deleting()))
    }

    /// The mirrored resource type.
    pub const fn resource(&self) -> &ResourceType {
        &self.resource
    }

    /// Naming and scope rules.
    pub const fn transformer(&self) -> &NameTransformer {
        &self.transformer
    }

    /// Provenance tagger.
    pub fn provenance(&self) -> &Provenance {
        self.writer.provenance()
    }

    /// Secret mirror submodule.
    pub const fn secrets(&self) -> &SecretMirror {
        &self.secrets
    }

    /// Registered resource types.
    pub const fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Event router feeding `queue` with the keys this reconciler handles.
    pub fn router(&self, queue: Arc<WorkQueue>) -> EventRouter {
        EventRouter::new(
            Arc::clone(&self.local),
            self.resource.clone(),
            self.provenance().clone(),
            self.secrets.secret_names().to_vec(),
            queue,
        )
    }
}

#[async_trait]
impl KeyReconciler for Reconciler {
    async fn reconcile_key(&self, key: &ObjectKey) -> ReconcileOutcome {
        self.reconcile(key).await.outcome
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    local: Option<Arc<dyn ObjectStore>>,
    remote: Option<Arc<dyn ObjectStore>>,
    registry: Option<Arc<TypeRegistry>>,
    config: Option<MirrorConfig>,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            local: None,
            remote: None,
            registry: None,
            config: None,
        }
    }

    /// Set the local cluster port.
    pub fn with_local(mut self, local: Arc<dyn ObjectStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Set the remote cluster port.
    pub fn with_remote(mut self, remote: Arc<dyn ObjectStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Set the type registry.
    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: MirrorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Fails when a part is missing, the configuration is invalid, or the
    /// mirrored type (or Secret, when secrets are configured) is not
    /// registered.
    pub fn build(self) -> Result<Reconciler> {
        let local = self
            .local
            .ok_or_else(|| Error::invalid_config("local store is required"))?;
        let remote = self
            .remote
            .ok_or_else(|| Error::invalid_config("remote store is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| Error::invalid_config("type registry is required"))?;
        let config = self
            .config
            .ok_or_else(|| Error::invalid_config("configuration is required"))?;

        config.validate()?;
        registry.resolve(&config.resource)?;
        if !config.secret_names.is_empty() {
            registry.resolve(&ResourceType::secret())?;
        }

        let transformer = NameTransformer::from_config(&config);
        let provenance = Provenance::new(config.controller_id());
        let writer = Arc::new(MirrorWriter::new(remote, provenance, config.propagation));
        let secrets = SecretMirror::new(
            local.clone(),
            writer.clone(),
            transformer.clone(),
            config.secret_names.clone(),
        );

        Ok(Reconciler {
            local,
            registry,
            resource: config.resource,
            transformer,
            writer,
            secrets,
        })
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
