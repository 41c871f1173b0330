//! Alert lists and dismissal.
//!
//! Both lists are returned most recent first. Dismissing an unknown id is a
//! 404, never an error on the monitor side.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde_json::json;
use tracing::info;

use crate::Monitor;

// ---

/// Returns the alert subrouter: list and dismiss for both alert classes.
///
/// # Returns
/// A `Router<Arc<Monitor>>`; the gateway binds the monitor as state.
pub fn router() -> Router<Arc<Monitor>> {
    // ---
    Router::new()
        .route("/alerts", get(list_alerts))
        .route("/alerts/{id}", delete(dismiss_alert))
        .route("/alerts/dead-fish", get(list_dead_fish))
        .route("/alerts/dead-fish/{id}", delete(dismiss_dead_fish))
}

async fn list_alerts(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    Json(monitor.alerts())
}

async fn list_dead_fish(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    Json(monitor.dead_fish_alerts())
}

async fn dismiss_alert(
    Path(id): Path<String>,
    State(monitor): State<Arc<Monitor>>,
) -> impl IntoResponse {
    // ---
    dismissed(monitor.dismiss(&id), &id)
}

async fn dismiss_dead_fish(
    Path(id): Path<String>,
    State(monitor): State<Arc<Monitor>>,
) -> impl IntoResponse {
    // ---
    dismissed(monitor.dismiss_dead_fish(&id), &id)
}

fn dismissed(removed: bool, id: &str) -> axum::response::Response {
    if removed {
        info!("DELETE alert {} - dismissed", id);
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!("No alert with id '{id}'") })),
        )
            .into_response()
    }
}
