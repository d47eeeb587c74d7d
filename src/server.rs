//! HTTP exposition of the gauge registry
//!
//! Scrapes read the shared prometheus [`Registry`] directly; the refresh
//! engine writes the same gauges from its own task. Gauge updates are atomic
//! so neither side blocks the other.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::Registry;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{ExporterError, Result};
use crate::metrics::render_registry;
use crate::readiness::{Readiness, ReadinessHandle};

pub const METRICS_PATH: &str = "/metrics";
pub const READINESS_PATH: &str = "/readyz";

#[derive(Clone)]
pub struct ServerState {
    registry: Registry,
    readiness: Option<ReadinessHandle>,
}

impl ServerState {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            readiness: None,
        }
    }

    /// Also serve `/readyz` from `handle`
    pub fn with_readiness(mut self, handle: ReadinessHandle) -> Self {
        self.readiness = Some(handle);
        self
    }
}

pub fn router(state: ServerState) -> Router {
    let mut router = Router::new().route(METRICS_PATH, get(metrics_handler));
    if state.readiness.is_some() {
        router = router.route(READINESS_PATH, get(readiness_handler));
    }
    router.with_state(state)
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    match render_registry(&state.registry) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn readiness_handler(State(state): State<ServerState>) -> Response {
    let readiness = state
        .readiness
        .as_ref()
        .map(ReadinessHandle::get)
        .unwrap_or(Readiness::Ready);

    let status = match readiness {
        Readiness::Ready => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, readiness.as_str()).into_response()
}

/// Bind the exposition listener; failure here is fatal at startup
pub async fn bind(address: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{}:{}", address, port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        ExporterError::ConfigError(format!("Failed to bind metrics server on {}: {}", addr, e))
    })?;
    Ok(listener)
}

/// Serve `state` on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    shutdown: CancellationToken,
) -> Result<()> {
    let local: SocketAddr = listener.local_addr()?;
    info!("Prometheus metrics available at http://{}{}", local, METRICS_PATH);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Metrics server stopped");
    Ok(())
}
