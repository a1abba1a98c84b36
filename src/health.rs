//! Health probe endpoints: GET /healthz, GET /readyz

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

/// Readiness flag shared between the bootstrap and the probe handlers.
#[derive(Debug, Clone, Default)]
pub struct Health {
    ready: Arc<AtomicBool>,
}

impl Health {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Probe response
#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    status: &'static str,
    version: &'static str,
}

const fn probe(status: &'static str) -> ProbeResponse {
    ProbeResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
    }
}

/// GET /healthz - the process is up
async fn healthz() -> Json<ProbeResponse> {
    Json(probe("ok"))
}

/// GET /readyz - clients are connected and watches are running
async fn readyz(State(health): State<Health>) -> (StatusCode, Json<ProbeResponse>) {
    if health.is_ready() {
        (StatusCode::OK, Json(probe("ok")))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(probe("starting")))
    }
}

pub fn router(health: Health) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(health)
}

/// Serve the probes until `shutdown` resolves.
///
/// # Errors
///
/// Fails when the address cannot be bound.
pub async fn serve<F>(addr: SocketAddr, health: Health, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Health probes listening");
    axum::serve(listener, router(health))
        .with_graceful_shutdown(shutdown)
        .await
}
