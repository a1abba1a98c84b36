#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # kubemirror
//!
//! Mirrors one namespaced resource type, and a fixed set of secrets from
//! each source namespace, from the cluster it runs in into a remote cluster.
//!
//! This library re-exports the workspace crates for convenience.

pub use kubemirror_core;
pub use kubemirror_kube;
pub use kubemirror_reconciler;

pub mod cli;
pub mod health;
