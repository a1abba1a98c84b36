//! Maps watch events from both clusters onto source keys.
//!
//! Routing errs on the side of extra work: a spurious key costs one no-op
//! reconcile, a missed key leaves drift in place until the next event.

use std::sync::Arc;

use futures::StreamExt;
use kubemirror_core::{ObjectKey, ObjectStore, ResourceType, Selector, WatchEvent, WatchStream};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::provenance::Provenance;
use crate::queue::WorkQueue;

/// Which watch an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// Source objects in the local cluster.
    LocalSource,
    /// Secrets in the local cluster.
    LocalSecret,
    /// Objects owned by this controller in the remote cluster.
    Remote,
}

impl EventOrigin {
    const fn as_str(self) -> &'static str {
        match self {
            Self::LocalSource => "local-source",
            Self::LocalSecret => "local-secret",
            Self::Remote => "remote",
        }
    }
}

/// Turns watch events into queued keys.
pub struct EventRouter {
    local: Arc<dyn ObjectStore>,
    resource: ResourceType,
    provenance: Provenance,
    secret_names: Vec<String>,
    queue: Arc<WorkQueue>,
}

impl EventRouter {
    pub fn new(
        local: Arc<dyn ObjectStore>,
        resource: ResourceType,
        provenance: Provenance,
        secret_names: Vec<String>,
        queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            local,
            resource,
            provenance,
            secret_names,
            queue,
        }
    }

    fn is_mirrored_secret(&self, name: &str) -> bool {
        self.secret_names.iter().any(|n| n == name)
    }

    /// Every source key in `namespace`.
    async fn sources_in(&self, namespace: &str) -> Result<Vec<ObjectKey>> {
        let sources = self.local.list(&self.resource, namespace).await?;
        Ok(sources.iter().map(kubemirror_core::Object::key).collect())
    }

    /// Source keys affected by one event.
    ///
    /// # Errors
    ///
    /// Fan-out needs a list call against the local store, which can fail.
    pub async fn route(&self, origin: EventOrigin, event: &WatchEvent) -> Result<Vec<ObjectKey>> {
        let object = event.object();
        match origin {
            EventOrigin::LocalSource => Ok(vec![object.key()]),
            EventOrigin::LocalSecret => {
                if self.is_mirrored_secret(&object.meta.name) {
                    self.sources_in(&object.meta.namespace).await
                } else {
                    Ok(Vec::new())
                }
            }
            EventOrigin::Remote => {
                let Some(source) = self.provenance.source_of(object) else {
                    return Ok(Vec::new());
                };
                if source.kind == self.resource.kind && object.type_ == self.resource {
                    Ok(vec![source.key])
                } else if object.type_ == ResourceType::secret()
                    && self.is_mirrored_secret(&source.key.name)
                {
                    self.sources_in(&source.key.namespace).await
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    /// Drain a watch stream into the queue. Returns when the stream ends.
    pub async fn pump(&self, origin: EventOrigin, mut stream: WatchStream) {
        while let Some(event) = stream.next().await {
            match self.route(origin, &event).await {
                Ok(keys) => {
                    for key in keys {
                        debug!(origin = origin.as_str(), key = %key, "Queueing key");
                        self.queue.add(key).await;
                    }
                }
                Err(e) => {
                    warn!(
                        origin = origin.as_str(),
                        object = %event.object().key(),
                        error = %e,
                        "Failed to route event"
                    );
                }
            }
        }
        info!(origin = origin.as_str(), "Watch stream ended");
    }

    /// Open every watch this controller depends on.
    ///
    /// # Errors
    ///
    /// Fails when a watch cannot be established.
    pub async fn subscribe(&self, remote: &dyn ObjectStore) -> Result<Vec<(EventOrigin, WatchStream)>> {
        let owned = self.provenance.selector();
        let mut streams = vec![
            (
                EventOrigin::LocalSource,
                self.local.watch(&self.resource, &Selector::everything()).await?,
            ),
            (EventOrigin::Remote, remote.watch(&self.resource, &owned).await?),
        ];

        if !self.secret_names.is_empty() {
            let secret = ResourceType::secret();
            streams.push((
                EventOrigin::LocalSecret,
                self.local.watch(&secret, &Selector::everything()).await?,
            ));
            streams.push((EventOrigin::Remote, remote.watch(&secret, &owned).await?));
        }

        Ok(streams)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provenance::SourceRef;
    use kubemirror_core::{BackoffConfig, InMemoryObjectStore, Object};

    fn widget() -> ResourceType {
        ResourceType::new("example.com", "v1", "Widget")
    }

    fn provenance() -> Provenance {
        Provenance::new("Widget.v1.example.com")
    }

    fn router(local: Arc<InMemoryObjectStore>) -> (EventRouter, Arc<WorkQueue>) {
        let queue = WorkQueue::new_arc(BackoffConfig::default());
        let router = EventRouter::new(
            local,
            widget(),
            provenance(),
            vec!["creds".into()],
            queue.clone(),
        );
        (router, queue)
    }

    fn object(type_: ResourceType, ns: &str, name: &str) -> Object {
        Object::new(type_, &ObjectKey::new(ns, name))
    }

    #[tokio::test]
    async fn test_local_source_routes_to_itself() {
        let (router, _) = router(InMemoryObjectStore::new_arc());
        let event = WatchEvent::Deleted(object(widget(), "team-a", "cfg"));
        let keys = router.route(EventOrigin::LocalSource, &event).await.unwrap();
        assert_eq!(keys, vec![ObjectKey::new("team-a", "cfg")]);
    }

    #[tokio::test]
    async fn test_local_secret_fans_out_to_namespace_sources() {
        let local = InMemoryObjectStore::new_arc();
        local.insert(object(widget(), "team-a", "one")).await;
        local.insert(object(widget(), "team-a", "two")).await;
        local.insert(object(widget(), "team-b", "three")).await;
        let (router, _) = router(local);

        let creds = WatchEvent::Applied(object(ResourceType::secret(), "team-a", "creds"));
        let mut keys = router.route(EventOrigin::LocalSecret, &creds).await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![ObjectKey::new("team-a", "one"), ObjectKey::new("team-a", "two")]
        );

        let other = WatchEvent::Applied(object(ResourceType::secret(), "team-a", "other"));
        assert!(router.route(EventOrigin::LocalSecret, &other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_mirror_routes_to_source() {
        let (router, _) = router(InMemoryObjectStore::new_arc());
        let mut mirror = object(widget(), "team-a-mirror", "cfg-copy");
        provenance().tag(&mut mirror, &SourceRef::new("Widget", ObjectKey::new("team-a", "cfg")));

        let keys = router
            .route(EventOrigin::Remote, &WatchEvent::Deleted(mirror))
            .await
            .unwrap();
        assert_eq!(keys, vec![ObjectKey::new("team-a", "cfg")]);

        let foreign = object(widget(), "team-a-mirror", "other");
        assert!(router
            .route(EventOrigin::Remote, &WatchEvent::Applied(foreign))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_remote_secret_mirror_fans_out() {
        let local = InMemoryObjectStore::new_arc();
        local.insert(object(widget(), "team-a", "cfg")).await;
        let (router, _) = router(local);

        let mut mirror = object(ResourceType::secret(), "team-a-mirror", "creds");
        provenance().tag(&mut mirror, &SourceRef::new("Secret", ObjectKey::new("team-a", "creds")));

        let keys = router
            .route(EventOrigin::Remote, &WatchEvent::Applied(mirror))
            .await
            .unwrap();
        assert_eq!(keys, vec![ObjectKey::new("team-a", "cfg")]);
    }

    #[tokio::test]
    async fn test_pump_feeds_queue() {
        let local = InMemoryObjectStore::new_arc();
        let (router, queue) = router(local.clone());
        let stream = local.watch(&widget(), &Selector::everything()).await.unwrap();

        local.insert(object(widget(), "team-a", "cfg")).await;
        local.insert(object(widget(), "team-a", "cfg")).await;

        let pump = tokio::spawn(async move { router.pump(EventOrigin::LocalSource, stream).await });
        let key = tokio::time::timeout(std::time::Duration::from_secs(1), queue.next())
            .await
            .unwrap();
        assert_eq!(key, Some(ObjectKey::new("team-a", "cfg")));
        pump.abort();
    }
}
