//! The assembled controller (watches, queue, workers) over in-memory clusters.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kubemirror_core::{
    BackoffConfig, DeleteOptions, InMemoryObjectStore, MirrorConfig, Object, ObjectKey,
    ObjectStore, Propagation, ResourceType, TypeInfo, TypeRegistry,
};
use kubemirror_reconciler::{LoopConfig, LoopStopper, Reconciler, ReconciliationLoop, WorkQueue};
use serde_json::json;
use tokio::task::JoinHandle;

fn widget() -> ResourceType {
    ResourceType::new("example.com", "v1", "Widget")
}

struct Controller {
    local: Arc<InMemoryObjectStore>,
    remote: Arc<InMemoryObjectStore>,
    stopper: LoopStopper,
    tasks: Vec<JoinHandle<()>>,
}

impl Controller {
    async fn start() -> Self {
        let local = InMemoryObjectStore::new_arc();
        let remote = InMemoryObjectStore::new_arc();

        let mut config = MirrorConfig::new(widget());
        config.namespace_prefix = "team-".into();
        config.local_namespace_suffix = "-mirror".into();
        config.remote_resource_suffix = "-copy".into();
        config.secret_names = vec!["creds".into()];
        config.concurrency = 2;

        let registry = TypeRegistry::with_builtins().with_type(widget(), TypeInfo::namespaced("widgets"));
        let reconciler = Arc::new(
            Reconciler::builder()
                .with_local(local.clone())
                .with_remote(remote.clone())
                .with_registry(Arc::new(registry))
                .with_config(config.clone())
                .build()
                .expect("reconciler should build"),
        );

        let queue = WorkQueue::new_arc(BackoffConfig::default());
        let router = Arc::new(reconciler.router(queue.clone()));
        let streams = router.subscribe(remote.as_ref()).await.unwrap();

        let mut tasks: Vec<JoinHandle<()>> = streams
            .into_iter()
            .map(|(origin, stream)| {
                let router = router.clone();
                tokio::spawn(async move { router.pump(origin, stream).await })
            })
            .collect();

        let mut reconciliation = ReconciliationLoop::new(
            reconciler,
            queue,
            LoopConfig {
                workers: config.concurrency,
            },
        );
        let stopper = reconciliation.stopper();
        tasks.push(tokio::spawn(async move {
            let _ = reconciliation.run().await;
        }));

        Self {
            local,
            remote,
            stopper,
            tasks,
        }
    }

    async fn mirror(&self) -> Option<Object> {
        self.remote
            .get(&widget(), &ObjectKey::new("team-a-mirror", "cfg-copy"))
            .await
            .unwrap()
    }

    async fn mirrored_secret(&self) -> Option<Object> {
        self.remote
            .get(&ResourceType::secret(), &ObjectKey::new("team-a-mirror", "creds"))
            .await
            .unwrap()
    }

    fn stop(self) {
        self.stopper.stop();
        self.tasks.iter().for_each(JoinHandle::abort);
    }
}

/// Poll until `check` holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn source(replicas: u32) -> Object {
    Object::new(widget(), &ObjectKey::new("team-a", "cfg")).with_field("spec", json!({"replicas": replicas}))
}

/// Given a running controller
/// When a source and its namespace's secret appear
/// Then both are mirrored without any explicit reconcile call
#[tokio::test]
async fn watch_events_drive_mirroring() {
    let controller = Controller::start().await;

    controller.local.insert(source(3)).await;
    assert!(eventually(|| async { controller.mirror().await.is_some() }).await);

    controller
        .local
        .insert(
            Object::new(ResourceType::secret(), &ObjectKey::new("team-a", "creds"))
                .with_field("data", json!({"token": "c2VjcmV0"})),
        )
        .await;
    assert!(eventually(|| async { controller.mirrored_secret().await.is_some() }).await);

    controller.local.insert(source(7)).await;
    assert!(
        eventually(|| async {
            controller
                .mirror()
                .await
                .is_some_and(|m| m.field("spec") == Some(&json!({"replicas": 7})))
        })
        .await
    );

    controller.stop();
}

/// Given a mirrored source
/// When someone edits the mirror in the remote cluster
/// Then the remote watch triggers a reconcile that restores it
#[tokio::test]
async fn remote_drift_is_healed() {
    let controller = Controller::start().await;
    controller.local.insert(source(3)).await;
    assert!(eventually(|| async { controller.mirror().await.is_some() }).await);

    let mut drifted = controller.mirror().await.unwrap();
    drifted.payload.insert("spec".into(), json!({"replicas": 0}));
    controller.remote.insert(drifted).await;

    assert!(
        eventually(|| async {
            controller
                .mirror()
                .await
                .is_some_and(|m| m.field("spec") == Some(&json!({"replicas": 3})))
        })
        .await
    );

    controller.stop();
}

/// Given a mirrored source
/// When the source is deleted
/// Then the mirror is deleted and, once collected, stays gone
#[tokio::test]
async fn source_deletion_propagates() {
    let controller = Controller::start().await;
    controller.local.insert(source(3)).await;
    assert!(eventually(|| async { controller.mirror().await.is_some() }).await);

    controller
        .local
        .delete(
            &widget(),
            &ObjectKey::new("team-a", "cfg"),
            &DeleteOptions::new(Propagation::Background),
        )
        .await
        .unwrap();
    assert!(eventually(|| async { controller.mirror().await.is_some_and(|m| m.is_deleting()) }).await);

    controller.remote.collect_garbage().await;
    assert!(eventually(|| async { controller.mirror().await.is_none() }).await);

    controller.stop();
}
