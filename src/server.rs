use axum::{extract::State, http::header, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::error::{FlowError, Result};
use crate::shutdown::Shutdown;
use crate::tracker::Tracker;

const ALLOW_ANY_ORIGIN: [(header::HeaderName, &str); 1] = [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")];

pub fn router(tracker: Arc<Tracker>) -> Router {
    Router::new()
        .route("/connections", get(connections))
        .route("/stats", get(stats))
        .with_state(tracker)
}

async fn connections(State(tracker): State<Arc<Tracker>>) -> impl IntoResponse {
    (ALLOW_ANY_ORIGIN, Json(tracker.export_snapshot()))
}

async fn stats(State(tracker): State<Arc<Tracker>>) -> impl IntoResponse {
    (ALLOW_ANY_ORIGIN, Json(tracker.stats()))
}

/// Serve the monitoring endpoints until shutdown.
pub async fn serve(tracker: Arc<Tracker>, addr: SocketAddr, mut shutdown: Shutdown) -> Result<()> {
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| FlowError::Server(format!("failed to bind {}: {}", addr, e)))?;

    info!("HTTP server started at http://localhost:{}/connections", addr.port());
    info!("Diagnostic stats available at http://localhost:{}/stats", addr.port());

    server
        .serve(router(tracker).into_make_service())
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(|e| FlowError::Server(e.to_string()))
}
