//! Live gauges and ad-hoc classification.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::models::{Parameter, Severity};
use crate::thresholds::ParameterStatus;
use crate::Monitor;

// ---

/// Returns the readings subrouter: the latest snapshot and the
/// single-value classifier.
pub fn router() -> Router<Arc<Monitor>> {
    // ---
    Router::new()
        .route("/readings/latest", get(latest))
        .route("/classify/{parameter}/{value}", get(classify))
}

/// `GET /readings/latest`: the last applied reading and its assessment.
async fn latest(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    // ---
    match monitor.snapshot() {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => {
            debug!("GET /readings/latest - nothing applied yet");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": "No data available" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct Classification {
    parameter: Parameter,
    value: f64,
    status: ParameterStatus,
    label: &'static str,
    severity: Severity,
    color: &'static str,
}

/// `GET /classify/{parameter}/{value}` against the monitor's table.
async fn classify(
    Path((parameter, value)): Path<(String, String)>,
    State(monitor): State<Arc<Monitor>>,
) -> impl IntoResponse {
    // ---
    let parameter: Parameter = match parameter.parse() {
        Ok(p) => p,
        Err(e) => return bad_request(e),
    };
    let value: f64 = match value.parse() {
        Ok(v) => v,
        Err(_) => return bad_request(format!("'{value}' is not a number")),
    };

    let status = monitor.table().classify(parameter, value);
    let body = Classification {
        parameter,
        value,
        status,
        label: status.label(),
        severity: status.severity(),
        color: status.indicator_color(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn bad_request(message: String) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}
