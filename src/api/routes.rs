//! API route definitions.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use super::state::AppState;
use crate::metrics::render_prometheus;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_json))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "uptime_secs": state.started.elapsed().as_secs(),
            "remediation_enabled": state.remediation_enabled,
        },
        "meta": meta()
    }))
}

async fn metrics_json(State(state): State<AppState>) -> Json<Value> {
    let gauges = state.status.gauges();
    Json(json!({
        "data": {
            "counters": state.status.metrics.snapshot(),
            "gauges": {
                "remediation_in_flight": gauges.remediation_in_flight,
                "remediation_queued": gauges.remediation_queued,
                "open_windows": gauges.open_windows,
            }
        },
        "meta": meta()
    }))
}

/// Prometheus text exposition.
pub async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    let body = render_prometheus(&state.status.metrics, state.status.gauges());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
