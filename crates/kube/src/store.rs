//! `ObjectStore` over a Kubernetes API server.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt, future};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams, Preconditions,
    PropagationPolicy,
};
use kube::runtime::{WatchStreamExt, watcher};
use kube::Client;
use kubemirror_core::{
    DeleteOptions, Object, ObjectKey, ObjectStore, Propagation, ResourceType, Result, Selector,
    TypeRegistry, WatchEvent, WatchStream,
};
use tracing::warn;

use crate::convert::{api_resource, from_dynamic, to_dynamic};
use crate::error::store_error;

/// Translate the propagation setting into the API's delete policy.
pub const fn propagation_policy(propagation: Propagation) -> PropagationPolicy {
    match propagation {
        Propagation::Foreground => PropagationPolicy::Foreground,
        Propagation::Background => PropagationPolicy::Background,
        Propagation::Orphan => PropagationPolicy::Orphan,
    }
}

/// Delete parameters for one request.
pub fn delete_params(options: &DeleteOptions) -> DeleteParams {
    DeleteParams {
        propagation_policy: Some(propagation_policy(options.propagation)),
        preconditions: options.precondition_uid.clone().map(|uid| Preconditions {
            uid: Some(uid),
            resource_version: None,
        }),
        ..DeleteParams::default()
    }
}

/// Object store backed by one cluster's API server.
///
/// Every call goes to the API server. Wrap it in
/// [`ReflectedObjectStore`](crate::cache::ReflectedObjectStore) to serve
/// reads from watch caches.
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
    registry: Arc<TypeRegistry>,
}

impl KubeObjectStore {
    pub fn new(client: Client, registry: Arc<TypeRegistry>) -> Self {
        Self { client, registry }
    }

    pub(crate) const fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub(crate) fn resource(&self, type_: &ResourceType) -> Result<ApiResource> {
        let info = self.registry.resolve(type_)?;
        Ok(api_resource(type_, info))
    }

    fn namespaced(&self, type_: &ResourceType, namespace: &str) -> Result<Api<DynamicObject>> {
        let resource = self.resource(type_)?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, &resource))
    }

    /// Watcher events for a type across all namespaces, with backoff.
    pub(crate) fn raw_watch(
        &self,
        type_: &ResourceType,
        selector: &Selector,
    ) -> Result<impl Stream<Item = watcher::Result<watcher::Event<DynamicObject>>> + Send + 'static> {
        let resource = self.resource(type_)?;
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        let config = if selector.is_empty() {
            watcher::Config::default()
        } else {
            watcher::Config::default().labels(&selector.to_query())
        };
        Ok(watcher(api, config).default_backoff())
    }
}

pub(crate) fn translate(
    registry: &TypeRegistry,
    type_: &ResourceType,
    event: std::result::Result<watcher::Event<DynamicObject>, watcher::Error>,
) -> Option<WatchEvent> {
    let (object, deleted) = match event {
        Ok(watcher::Event::Apply(object) | watcher::Event::InitApply(object)) => (object, false),
        Ok(watcher::Event::Delete(object)) => (object, true),
        Ok(watcher::Event::Init | watcher::Event::InitDone) => return None,
        Err(e) => {
            warn!(type_ = %type_, error = %e, "Watch failed, backing off");
            return None;
        }
    };

    match from_dynamic(registry, type_, object) {
        Ok(object) if deleted => Some(WatchEvent::Deleted(object)),
        Ok(object) => Some(WatchEvent::Applied(object)),
        Err(e) => {
            warn!(type_ = %type_, error = %e, "Dropping undecodable watch event");
            None
        }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, type_: &ResourceType, key: &ObjectKey) -> Result<Option<Object>> {
        let api = self.namespaced(type_, &key.namespace)?;
        let found = api
            .get_opt(&key.name)
            .await
            .map_err(|e| store_error(e, type_, key))?;
        found
            .map(|object| from_dynamic(&self.registry, type_, object))
            .transpose()
    }

    async fn list(&self, type_: &ResourceType, namespace: &str) -> Result<Vec<Object>> {
        let api = self.namespaced(type_, namespace)?;
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| store_error(e, type_, &ObjectKey::new(namespace, "")))?;
        list.items
            .into_iter()
            .map(|object| from_dynamic(&self.registry, type_, object))
            .collect()
    }

    async fn create(&self, object: &Object) -> Result<Object> {
        let key = object.key();
        let api = self.namespaced(&object.type_, &key.namespace)?;
        let body = to_dynamic(&self.registry, object)?;
        let created = api
            .create(&PostParams::default(), &body)
            .await
            .map_err(|e| store_error(e, &object.type_, &key))?;
        from_dynamic(&self.registry, &object.type_, created)
    }

    async fn update(&self, object: &Object) -> Result<Object> {
        let key = object.key();
        let api = self.namespaced(&object.type_, &key.namespace)?;
        let body = to_dynamic(&self.registry, object)?;
        let replaced = api
            .replace(&key.name, &PostParams::default(), &body)
            .await
            .map_err(|e| store_error(e, &object.type_, &key))?;
        from_dynamic(&self.registry, &object.type_, replaced)
    }

    async fn delete(&self, type_: &ResourceType, key: &ObjectKey, options: &DeleteOptions) -> Result<()> {
        let api = self.namespaced(type_, &key.namespace)?;
        api.delete(&key.name, &delete_params(options))
            .await
            .map(|_| ())
            .map_err(|e| store_error(e, type_, key))
    }

    async fn watch(&self, type_: &ResourceType, selector: &Selector) -> Result<WatchStream> {
        let registry = Arc::clone(&self.registry);
        let events = self.raw_watch(type_, selector)?;
        let type_ = type_.clone();
        let stream = events
            .filter_map(move |event| future::ready(translate(&registry, &type_, event)))
            .boxed();
        Ok(stream)
    }
}
