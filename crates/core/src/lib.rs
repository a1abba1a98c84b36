//! Core types, store port, registry and configuration for kubemirror.
//!
//! Everything here is independent of how the two clusters are reached:
//! the engine talks to [`ObjectStore`] implementations and describes
//! objects with the structural [`Object`] model.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod registry;
pub mod result;
pub mod store;
pub mod types;

pub use config::{BackoffConfig, MirrorConfig};
pub use error::Error;
pub use registry::{TypeInfo, TypeRegistry};
pub use result::{Result, ResultExt};
pub use store::{
    DeleteOptions, FOREGROUND_FINALIZER, InMemoryObjectStore, ObjectStore, Propagation, Selector,
    TracingObjectStore, WatchEvent, WatchStream,
};
pub use types::{Object, ObjectKey, ObjectMeta, OwnerReference, Payload, ResourceType};
