//! Object store port and implementations.
//!
//! Both clusters are reached through [`ObjectStore`]. The in-memory store
//! mirrors the API server semantics the engine relies on: version tokens,
//! uid preconditions, deletion markers and asynchronous garbage collection
//! of foreground deletions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::result::Result;
use crate::types::{Object, ObjectKey, ResourceType};

/// Finalizer held by an object while its dependents are removed.
pub const FOREGROUND_FINALIZER: &str = "foregroundDeletion";

/// How dependents are handled when an object is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Propagation {
    /// Dependents are removed before the object itself is removed.
    #[default]
    Foreground,
    /// The object is removed at once; dependents are collected later.
    Background,
    /// Dependents are kept and lose their owner reference.
    Orphan,
}

/// Options for a delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub propagation: Propagation,
    /// Only delete if the stored object still has this uid.
    pub precondition_uid: Option<String>,
}

impl DeleteOptions {
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            precondition_uid: None,
        }
    }

    pub fn with_uid(mut self, uid: Option<String>) -> Self {
        self.precondition_uid = uid;
        self
    }
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    labels: BTreeMap<String, String>,
}

impl Selector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, object: &Object) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| object.meta.labels.get(k) == Some(v))
    }

    /// `key=value,...` form used by API server queries.
    pub fn to_query(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A change observed on a watched object.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Created or modified.
    Applied(Object),
    /// Removed from the store.
    Deleted(Object),
}

impl WatchEvent {
    pub const fn object(&self) -> &Object {
        match self {
            Self::Applied(object) | Self::Deleted(object) => object,
        }
    }
}

/// Stream of watch events.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Access port to one cluster's object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read one object. `Ok(None)` when it does not exist.
    async fn get(&self, type_: &ResourceType, key: &ObjectKey) -> Result<Option<Object>>;

    /// List objects of a type in one namespace.
    async fn list(&self, type_: &ResourceType, namespace: &str) -> Result<Vec<Object>>;

    /// Create an object. Fails with `AlreadyExists` on collision.
    async fn create(&self, object: &Object) -> Result<Object>;

    /// Replace an object. The object's version token must match the stored one.
    async fn update(&self, object: &Object) -> Result<Object>;

    /// Request deletion of an object.
    async fn delete(&self, type_: &ResourceType, key: &ObjectKey, options: &DeleteOptions) -> Result<()>;

    /// Subscribe to changes of a type across all namespaces.
    async fn watch(&self, type_: &ResourceType, selector: &Selector) -> Result<WatchStream>;
}

type Slot = (ResourceType, ObjectKey);

/// In-memory object store.
///
/// Deletions that have to wait (foreground propagation or pending
/// finalizers) leave the object in place with a deletion timestamp until
/// [`InMemoryObjectStore::collect_garbage`] runs, the way an API server's
/// garbage collector finishes them asynchronously.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<Slot, Object>>,
    next_version: AtomicU64,
    writes: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    read_faults: Mutex<VecDeque<Error>>,
    write_faults: Mutex<VecDeque<Error>>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            next_version: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            events,
            read_faults: Mutex::new(VecDeque::new()),
            write_faults: Mutex::new(VecDeque::new()),
        }
    }
}

impl InMemoryObjectStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Write an object the way an external actor would: no version check,
    /// uid kept or assigned, version token bumped.
    pub async fn insert(&self, object: Object) -> Object {
        let mut stored = object;
        let slot = (stored.type_.clone(), stored.key());
        let mut objects = self.objects.write().await;
        stored.meta.uid = objects
            .get(&slot)
            .and_then(|existing| existing.meta.uid.clone())
            .or(stored.meta.uid)
            .or_else(|| Some(ulid::Ulid::new().to_string()));
        stored.meta.resource_version = Some(self.bump_version());
        objects.insert(slot, stored.clone());
        drop(objects);
        self.emit(WatchEvent::Applied(stored.clone()));
        stored
    }

    /// Make the next read fail with `error`.
    pub async fn fail_next_read(&self, error: Error) {
        self.read_faults.lock().await.push_back(error);
    }

    /// Make the next write fail with `error`.
    pub async fn fail_next_write(&self, error: Error) {
        self.write_faults.lock().await.push_back(error);
    }

    /// Number of successful create, update and delete calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored objects of a type, across namespaces.
    pub async fn count(&self, type_: &ResourceType) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(t, _)| t == type_)
            .count()
    }

    /// Finish pending deletions until nothing changes.
    ///
    /// Dependents of a foreground deletion are removed before their owner
    /// releases its finalizer. Objects whose owners are gone are collected.
    /// Returns the number of removed objects.
    pub async fn collect_garbage(&self) -> usize {
        let mut removed = Vec::new();
        {
            let mut objects = self.objects.write().await;
            loop {
                let live_uids: Vec<String> = objects
                    .values()
                    .filter_map(|o| o.meta.uid.clone())
                    .collect();

                // Dependents of deleting owners, and orphans whose owners are gone.
                let doomed: Vec<Slot> = objects
                    .iter()
                    .filter(|(_, o)| {
                        o.meta.owner_references.iter().any(|r| {
                            !live_uids.contains(&r.uid)
                                || objects.values().any(|owner| {
                                    owner.meta.uid.as_deref() == Some(r.uid.as_str())
                                        && owner.is_deleting()
                                })
                        })
                    })
                    .map(|(slot, _)| slot.clone())
                    .collect();

                let mut changed = false;
                for slot in doomed {
                    if let Some(object) = objects.get_mut(&slot) {
                        if object.meta.finalizers.is_empty() {
                            if let Some(gone) = objects.remove(&slot) {
                                removed.push(gone);
                                changed = true;
                            }
                        } else if !object.is_deleting() {
                            object.meta.deletion_timestamp = Some(now());
                            changed = true;
                        }
                    }
                }

                // Owners whose dependents are all gone release the foreground finalizer.
                let releasable: Vec<Slot> = objects
                    .iter()
                    .filter(|(_, o)| o.meta.finalizers.iter().any(|f| f == FOREGROUND_FINALIZER))
                    .filter(|(_, o)| {
                        let uid = o.meta.uid.clone().unwrap_or_default();
                        !objects.values().any(|d| d.is_owned_by(&uid))
                    })
                    .map(|(slot, _)| slot.clone())
                    .collect();

                for slot in releasable {
                    if let Some(object) = objects.get_mut(&slot) {
                        object.meta.finalizers.retain(|f| f != FOREGROUND_FINALIZER);
                        if object.meta.finalizers.is_empty() {
                            if let Some(gone) = objects.remove(&slot) {
                                removed.push(gone);
                            }
                        }
                        changed = true;
                    }
                }

                if !changed {
                    break;
                }
            }
        }

        let count = removed.len();
        removed
            .into_iter()
            .for_each(|object| self.emit(WatchEvent::Deleted(object)));
        if count > 0 {
            debug!(removed = count, "Garbage collection finished deletions");
        }
        count
    }

    fn bump_version(&self) -> String {
        self.next_version
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
            .to_string()
    }

    fn emit(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    async fn take_read_fault(&self) -> Result<()> {
        self.read_faults.lock().await.pop_front().map_or(Ok(()), Err)
    }

    async fn take_write_fault(&self) -> Result<()> {
        self.write_faults.lock().await.pop_front().map_or(Ok(()), Err)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, type_: &ResourceType, key: &ObjectKey) -> Result<Option<Object>> {
        self.take_read_fault().await?;
        let objects = self.objects.read().await;
        Ok(objects.get(&(type_.clone(), key.clone())).cloned())
    }

    async fn list(&self, type_: &ResourceType, namespace: &str) -> Result<Vec<Object>> {
        self.take_read_fault().await?;
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((t, k), _)| t == type_ && k.namespace == namespace)
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, object: &Object) -> Result<Object> {
        self.take_write_fault().await?;
        let key = object.key();
        if key.name.is_empty() {
            return Err(Error::invalid_object("name is required"));
        }
        if object.meta.resource_version.is_some() {
            return Err(Error::rejected(
                "resourceVersion must not be set on objects to be created",
            ));
        }

        let slot = (object.type_.clone(), key.clone());
        let mut objects = self.objects.write().await;
        if objects.contains_key(&slot) {
            return Err(Error::already_exists(&object.type_, &key));
        }

        let mut stored = object.clone();
        stored.meta.uid = Some(ulid::Ulid::new().to_string());
        stored.meta.resource_version = Some(self.bump_version());
        stored.meta.deletion_timestamp = None;
        objects.insert(slot, stored.clone());
        drop(objects);

        trace!(type_ = %stored.type_, key = %key, "Created object");
        self.record_write();
        self.emit(WatchEvent::Applied(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, object: &Object) -> Result<Object> {
        self.take_write_fault().await?;
        let key = object.key();
        let slot = (object.type_.clone(), key.clone());
        let mut objects = self.objects.write().await;

        let current = objects
            .get(&slot)
            .ok_or_else(|| Error::not_found(&object.type_, &key))?;
        if object.meta.resource_version.is_none()
            || object.meta.resource_version != current.meta.resource_version
        {
            return Err(Error::conflict(
                &object.type_,
                &key,
                "the object has been modified; apply your changes to the latest version",
            ));
        }

        let mut stored = object.clone();
        stored.meta.uid = current.meta.uid.clone();
        stored.meta.deletion_timestamp = current.meta.deletion_timestamp.clone();
        stored.meta.resource_version = Some(self.bump_version());

        let event = if stored.is_deleting() && stored.meta.finalizers.is_empty() {
            objects.remove(&slot);
            WatchEvent::Deleted(stored.clone())
        } else {
            objects.insert(slot, stored.clone());
            WatchEvent::Applied(stored.clone())
        };
        drop(objects);

        trace!(type_ = %stored.type_, key = %key, "Updated object");
        self.record_write();
        self.emit(event);
        Ok(stored)
    }

    async fn delete(&self, type_: &ResourceType, key: &ObjectKey, options: &DeleteOptions) -> Result<()> {
        self.take_write_fault().await?;
        let slot = (type_.clone(), key.clone());
        let mut objects = self.objects.write().await;

        let current = objects
            .get_mut(&slot)
            .ok_or_else(|| Error::not_found(type_, key))?;
        if let Some(uid) = &options.precondition_uid {
            if current.meta.uid.as_ref() != Some(uid) {
                return Err(Error::conflict(type_, key, "uid precondition failed"));
            }
        }
        if current.is_deleting() {
            return Ok(());
        }

        if options.propagation == Propagation::Foreground {
            current.meta.finalizers.push(FOREGROUND_FINALIZER.to_string());
        }

        let event = if current.meta.finalizers.is_empty() {
            objects.remove(&slot).map(WatchEvent::Deleted)
        } else {
            current.meta.deletion_timestamp = Some(now());
            current.meta.resource_version = Some(self.bump_version());
            Some(WatchEvent::Applied(current.clone()))
        };

        if options.propagation == Propagation::Orphan {
            let owner_uid = event
                .as_ref()
                .and_then(|e| e.object().meta.uid.clone())
                .unwrap_or_default();
            objects
                .values_mut()
                .for_each(|o| o.meta.owner_references.retain(|r| r.uid != owner_uid));
        }
        drop(objects);

        debug!(type_ = %type_, key = %key, propagation = ?options.propagation, "Deletion requested");
        self.record_write();
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    async fn watch(&self, type_: &ResourceType, selector: &Selector) -> Result<WatchStream> {
        let receiver = self.events.subscribe();
        let type_ = type_.clone();
        let selector = selector.clone();

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Watch subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |event| {
            let object = event.object();
            future::ready(object.type_ == type_ && selector.matches(object))
        });

        Ok(stream.boxed())
    }
}

/// A wrapper that adds tracing to an object store.
pub struct TracingObjectStore<S: ObjectStore> {
    inner: S,
    cluster: &'static str,
}

impl<S: ObjectStore> TracingObjectStore<S> {
    /// Wrap `inner`, labelling every span with `cluster`.
    pub const fn new(inner: S, cluster: &'static str) -> Self {
        Self { inner, cluster }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for TracingObjectStore<S> {
    async fn get(&self, type_: &ResourceType, key: &ObjectKey) -> Result<Option<Object>> {
        trace!(cluster = self.cluster, type_ = %type_, key = %key, "Reading object");
        self.inner.get(type_, key).await
    }

    async fn list(&self, type_: &ResourceType, namespace: &str) -> Result<Vec<Object>> {
        trace!(cluster = self.cluster, type_ = %type_, namespace, "Listing objects");
        self.inner.list(type_, namespace).await
    }

    async fn create(&self, object: &Object) -> Result<Object> {
        debug!(cluster = self.cluster, type_ = %object.type_, key = %object.key(), "Creating object");
        let result = self.inner.create(object).await;
        if let Err(ref e) = result {
            debug!(cluster = self.cluster, error = %e, "Create failed");
        }
        result
    }

    async fn update(&self, object: &Object) -> Result<Object> {
        debug!(
            cluster = self.cluster,
            type_ = %object.type_,
            key = %object.key(),
            resource_version = ?object.meta.resource_version,
            "Updating object"
        );
        let result = self.inner.update(object).await;
        if let Err(ref e) = result {
            debug!(cluster = self.cluster, error = %e, "Update failed");
        }
        result
    }

    async fn delete(&self, type_: &ResourceType, key: &ObjectKey, options: &DeleteOptions) -> Result<()> {
        debug!(cluster = self.cluster, type_ = %type_, key = %key, "Deleting object");
        self.inner.delete(type_, key, options).await
    }

    async fn watch(&self, type_: &ResourceType, selector: &Selector) -> Result<WatchStream> {
        debug!(cluster = self.cluster, type_ = %type_, selector = %selector.to_query(), "Starting watch");
        self.inner.watch(type_, selector).await
    }
}
