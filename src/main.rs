//! # kubemirror - controller entry point
//!
//! ## Initialization Sequence
//!
//! 1. **Configuration** - Parse flags or the TOML file and validate
//! 2. **Health Probes** - Serve /healthz and /readyz (not ready yet)
//! 3. **Clients** - Connect to the local and remote API servers; local reads
//!    come from watch caches
//! 4. **Type Registry** - Discover the mirrored type's plural name
//! 5. **Reconciler** - Build the engine over both stores
//! 6. **Watches** - Route events from both clusters into the work queue
//! 7. **Reconciliation Loop** - Drain the queue with a bounded worker pool
//!
//! Any failure during initialization halts startup with a clear error.
//!
//! ## Shutdown
//!
//! SIGINT marks the process not ready, stops the loop and the watches, and
//! abandons in-flight reconciles. Every write is derived from fresh reads,
//! so the next start picks up where this one stopped.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kubemirror::cli::Cli;
use kubemirror::health::{self, Health};
use kubemirror_core::{MirrorConfig, ObjectStore, TracingObjectStore, TypeRegistry};
use kubemirror_kube::{
    Client, KubeObjectStore, ReflectedObjectStore, discover, local_client, remote_client,
};
use kubemirror_reconciler::{LoopConfig, Reconciler, ReconciliationLoop, WorkQueue};

/// Main entry point for kubemirror.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.mirror_config().context("Invalid configuration")?;
    let health_addr = cli
        .health_address()
        .context("Invalid --health-probe-bind-address")?;

    info!(
        resource = %config.resource,
        controller = %config.controller_id(),
        secrets = config.secret_names.len(),
        "kubemirror starting"
    );

    // Probes come up first so liveness holds while the clients connect.
    let health = Health::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let probe_server = tokio::spawn(health::serve(
        health_addr,
        health.clone(),
        wait_for_flag(shutdown_rx),
    ));

    let local_client = local_client().await.context("Failed to connect to the local cluster")?;
    let remote_client = remote_client(&cli.remote_kubeconfig)
        .await
        .context("Failed to connect to the remote cluster")?;

    let registry = Arc::new(init_registry(&local_client, &config).await?);
    // Local reads are served from the caches fed by the local watches.
    let local: Arc<dyn ObjectStore> = Arc::new(TracingObjectStore::new(
        ReflectedObjectStore::new(KubeObjectStore::new(local_client, Arc::clone(&registry))),
        "local",
    ));
    let remote: Arc<dyn ObjectStore> = Arc::new(TracingObjectStore::new(
        KubeObjectStore::new(remote_client, Arc::clone(&registry)),
        "remote",
    ));

    let reconciler = Arc::new(
        Reconciler::builder()
            .with_local(Arc::clone(&local))
            .with_remote(Arc::clone(&remote))
            .with_registry(registry)
            .with_config(config.clone())
            .build()
            .context("Failed to build reconciler")?,
    );
    info!("Reconciler initialized");

    let queue = WorkQueue::new_arc(config.backoff);
    let router = Arc::new(reconciler.router(Arc::clone(&queue)));
    let streams = router
        .subscribe(remote.as_ref())
        .await
        .context("Failed to start watches")?;
    let pumps: Vec<_> = streams
        .into_iter()
        .map(|(origin, stream)| {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.pump(origin, stream).await })
        })
        .collect();
    info!(watches = pumps.len(), "Watches started");

    let mut reconciliation = ReconciliationLoop::new(
        reconciler,
        queue,
        LoopConfig {
            workers: config.concurrency,
        },
    );
    let stopper = reconciliation.stopper();
    let loop_handle = tokio::spawn(async move { reconciliation.run().await });

    health.set_ready(true);
    info!("kubemirror ready");

    wait_for_shutdown().await;

    health.set_ready(false);
    stopper.stop();
    pumps.iter().for_each(tokio::task::JoinHandle::abort);

    match loop_handle.await {
        Ok(Ok(())) => info!("Reconciliation loop finished"),
        Ok(Err(e)) => error!(error = %e, "Reconciliation loop failed"),
        Err(e) => error!(error = %e, "Reconciliation loop panicked"),
    }

    let _ = shutdown_tx.send(true);
    match probe_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Health probe server failed"),
        Err(e) => warn!(error = %e, "Health probe server panicked"),
    }

    info!("kubemirror stopped");
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Register the built-in types and the mirrored type.
async fn init_registry(client: &Client, config: &MirrorConfig) -> Result<TypeRegistry> {
    let mut registry = TypeRegistry::with_builtins();
    discover(client, &mut registry, &config.resource, config.plural.as_deref())
        .await
        .context("Failed to resolve the mirrored resource type")?;
    Ok(registry)
}

async fn wait_for_flag(mut flag: watch::Receiver<bool>) {
    while !*flag.borrow() {
        if flag.changed().await.is_err() {
            return;
        }
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
