//! Reconciliation engine mirroring one resource type into a remote cluster.
//!
//! For every source object in the local cluster the engine maintains one
//! mirror in the remote cluster, plus copies of a fixed set of secrets from
//! the source's namespace.
//!
//! # Key Concepts
//!
//! ## Reconciliation
//!
//! [`Reconciler::reconcile`] takes one source key and:
//! 1. Reads the source from the local cluster
//! 2. Creates, updates or deletes its mirror in the remote cluster
//! 3. Converges the namespace's secret mirrors
//! 4. Reports a [`ReconcileOutcome`] telling the scheduler what to do next
//!
//! Nothing is cached between invocations, so duplicate or stale triggers
//! only cost a no-op reconcile.
//!
//! ## Ownership
//!
//! Every remote object the engine writes carries [`Provenance`] metadata.
//! Objects without it are never modified or deleted.
//!
//! ## Scheduling
//!
//! [`EventRouter`] turns watch events from both clusters into keys on a
//! [`WorkQueue`]; [`ReconciliationLoop`] drains the queue with a bounded
//! worker pool and retries transient failures with backoff.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kubemirror_core::{InMemoryObjectStore, MirrorConfig, ResourceType, TypeInfo, TypeRegistry};
//! use kubemirror_reconciler::{LoopConfig, Reconciler, ReconciliationLoop, WorkQueue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kubemirror_reconciler::Error> {
//!     let widget = ResourceType::new("example.com", "v1", "Widget");
//!     let registry = TypeRegistry::with_builtins().with_type(widget.clone(), TypeInfo::namespaced("widgets"));
//!     let config = MirrorConfig::new(widget);
//!
//!     let reconciler = Arc::new(
//!         Reconciler::builder()
//!             .with_local(InMemoryObjectStore::new_arc())
//!             .with_remote(InMemoryObjectStore::new_arc())
//!             .with_registry(Arc::new(registry))
//!             .with_config(config.clone())
//!             .build()?,
//!     );
//!
//!     let queue = WorkQueue::new_arc(config.backoff);
//!     let mut loop_runner = ReconciliationLoop::new(reconciler, queue, LoopConfig::default());
//!
//!     // Run until stopped
//!     loop_runner.run().await
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod converge;
pub mod error;
pub mod r#loop;
pub mod provenance;
pub mod queue;
pub mod reconciler;
pub mod secrets;
pub mod transform;
pub mod triggers;
pub mod types;

// Re-export main types
pub use converge::{ConvergePlan, MirrorWriter, RemovePlan, plan_converge, plan_remove};
pub use error::{Error, Result};
pub use r#loop::{KeyReconciler, LoopConfig, LoopStopper, ReconciliationLoop};
pub use provenance::{
    MANAGED_BY_LABEL, Provenance, SOURCE_KIND_ANNOTATION, SOURCE_NAME_ANNOTATION,
    SOURCE_NAMESPACE_ANNOTATION, SourceRef,
};
pub use queue::{WorkQueue, backoff_delay};
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use secrets::SecretMirror;
pub use transform::NameTransformer;
pub use triggers::{EventOrigin, EventRouter};
pub use types::{MirrorAction, ReconcileOutcome, ReconcileReport};
