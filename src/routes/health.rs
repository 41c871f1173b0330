// src/routes/health.rs
//! Liveness endpoint.
//!
//! `/health` answers as long as the HTTP server is up. It does not touch the
//! backend or the monitor, so a backend outage does not fail the liveness check.

use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Returns a `Router` that serves `GET /health`.
///
/// The endpoint reports `{"status":"ok","version":...}` and depends on no
/// application state, so the router is generic over whatever state the
/// gateway binds.
///
/// # Type Parameters
/// * `S` - Shared application state type; must be `Clone + Send + Sync +
///   'static` as `axum::Router` requires
///
/// # Returns
/// A `Router<S>` ready to be merged into the gateway.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
