//! HTTP gateway for the view layer.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! binds the shared [`Monitor`] as state, so `main.rs` never sees
//! individual endpoints.

use std::sync::Arc;

use axum::Router;

use crate::Monitor;

mod alerts;
mod health;
mod readings;

// ---

/// Creates the application router with every endpoint mounted.
///
/// This is the main entry point for configuring the HTTP API. It merges
/// the feature subrouters and binds the shared monitor as state:
/// - `alerts`: `GET /alerts`, `DELETE /alerts/{id}`, and the dead-fish
///   equivalents under `/alerts/dead-fish`
/// - `readings`: `GET /readings/latest`, `GET /classify/{parameter}/{value}`
/// - `health`: `GET /health`
///
/// # Arguments
/// * `monitor` - Shared monitor the feed writes into and handlers read from
///
/// # Returns
/// A `Router` with all state bound, ready for `axum::serve`.
pub fn router(monitor: Arc<Monitor>) -> Router {
    // ---
    Router::new()
        .merge(alerts::router())
        .merge(readings::router())
        .merge(health::router())
        .with_state(monitor)
}
