//! Kubernetes API server port for kubemirror.
//!
//! Implements the engine's [`ObjectStore`](kubemirror_core::ObjectStore)
//! over `kube::Api<DynamicObject>`, so one binary can mirror any namespaced
//! type without compiled-in bindings.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cache;
pub mod client;
pub mod convert;
pub mod discovery;
pub mod error;
pub mod store;

pub use cache::ReflectedObjectStore;
pub use client::{local_client, remote_client};
pub use discovery::discover;
pub use error::{Error, Result, store_error};
pub use store::KubeObjectStore;

pub use kube::Client;
