//! Watch-fed read cache.
//!
//! Every unfiltered watch opened through [`ReflectedObjectStore`] also feeds
//! a `kube::runtime::reflector` store. Once that watch has finished its
//! initial list, `get` and `list` for the type are answered from the cache
//! instead of the API server. Writes always go to the API server.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, future};
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{WatchStreamExt, watcher};
use kubemirror_core::{
    DeleteOptions, Object, ObjectKey, ObjectStore, ResourceType, Result, Selector, TypeRegistry,
    WatchStream,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::convert::from_dynamic;
use crate::store::{KubeObjectStore, translate};

/// One reflected type.
#[derive(Clone)]
struct Reflection {
    reader: Store<DynamicObject>,
    resource: ApiResource,
    synced: Arc<AtomicBool>,
}

impl Reflection {
    /// The reader, once the initial list has been applied.
    fn synced_reader(&self) -> Option<&Store<DynamicObject>> {
        self.synced.load(Ordering::Acquire).then_some(&self.reader)
    }
}

/// Look up one object in a reflector store.
fn cached_get(
    registry: &TypeRegistry,
    type_: &ResourceType,
    reader: &Store<DynamicObject>,
    resource: &ApiResource,
    key: &ObjectKey,
) -> Result<Option<Object>> {
    let reference = ObjectRef::new_with(&key.name, resource.clone()).within(&key.namespace);
    reader
        .get(&reference)
        .map(|object| from_dynamic(registry, type_, (*object).clone()))
        .transpose()
}

/// Every cached object in one namespace.
fn cached_list(
    registry: &TypeRegistry,
    type_: &ResourceType,
    reader: &Store<DynamicObject>,
    namespace: &str,
) -> Result<Vec<Object>> {
    reader
        .state()
        .into_iter()
        .filter(|object| object.metadata.namespace.as_deref() == Some(namespace))
        .map(|object| from_dynamic(registry, type_, (*object).clone()))
        .collect()
}

/// [`KubeObjectStore`] with reads served from watch caches.
///
/// Only watches without a label selector are reflected: a filtered cache
/// cannot answer reads for objects outside the filter. Until a type's
/// watch has completed its initial list, reads for it go to the API server.
pub struct ReflectedObjectStore {
    inner: KubeObjectStore,
    reflections: RwLock<HashMap<ResourceType, Reflection>>,
}

impl ReflectedObjectStore {
    pub fn new(inner: KubeObjectStore) -> Self {
        Self {
            inner,
            reflections: RwLock::new(HashMap::new()),
        }
    }

    async fn reflection(&self, type_: &ResourceType) -> Option<Reflection> {
        self.reflections
            .read()
            .await
            .get(type_)
            .filter(|reflection| reflection.synced_reader().is_some())
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for ReflectedObjectStore {
    async fn get(&self, type_: &ResourceType, key: &ObjectKey) -> Result<Option<Object>> {
        match self.reflection(type_).await {
            Some(cache) => cached_get(self.inner.registry(), type_, &cache.reader, &cache.resource, key),
            None => self.inner.get(type_, key).await,
        }
    }

    async fn list(&self, type_: &ResourceType, namespace: &str) -> Result<Vec<Object>> {
        match self.reflection(type_).await {
            Some(cache) => cached_list(self.inner.registry(), type_, &cache.reader, namespace),
            None => self.inner.list(type_, namespace).await,
        }
    }

    async fn create(&self, object: &Object) -> Result<Object> {
        self.inner.create(object).await
    }

    async fn update(&self, object: &Object) -> Result<Object> {
        self.inner.update(object).await
    }

    async fn delete(&self, type_: &ResourceType, key: &ObjectKey, options: &DeleteOptions) -> Result<()> {
        self.inner.delete(type_, key, options).await
    }

    /// Opening a second unfiltered watch for a type replaces its cache.
    async fn watch(&self, type_: &ResourceType, selector: &Selector) -> Result<WatchStream> {
        if !selector.is_empty() {
            return self.inner.watch(type_, selector).await;
        }

        let resource = self.inner.resource(type_)?;
        let writer = reflector::store::Writer::new(resource.clone());
        let synced = Arc::new(AtomicBool::new(false));
        self.reflections.write().await.insert(
            type_.clone(),
            Reflection {
                reader: writer.as_reader(),
                resource,
                synced: Arc::clone(&synced),
            },
        );
        debug!(type_ = %type_, "Reflecting watch into read cache");

        let registry = Arc::clone(self.inner.registry());
        let translated_type = type_.clone();
        let stream = self
            .inner
            .raw_watch(type_, selector)?
            .reflect(writer)
            .inspect(move |event| {
                if matches!(event, Ok(watcher::Event::InitDone)) {
                    synced.store(true, Ordering::Release);
                }
            })
            .filter_map(move |event| future::ready(translate(&registry, &translated_type, event)))
            .boxed();
        Ok(stream)
    }
}
