//! Operator API -- health and metrics over axum.

mod routes;
pub mod state;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use self::state::AppState;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .route("/metrics", get(routes::metrics_text))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}

/// Serve the API until the task is dropped.
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let addr: std::net::SocketAddr = bind.parse().with_context(|| format!("bad bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!(%addr, "operator API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::metrics::PipelineMetrics;
    use crate::observe::EventBus;
    use crate::pipeline::Pipeline;
    use crate::publish::MemorySink;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<PipelineMetrics>) {
        let metrics = PipelineMetrics::new();
        let pipeline = Pipeline::new(
            &PipelineConfig::default(),
            Arc::new(MemorySink::new()),
            None,
            metrics.clone(),
            EventBus::default(),
        );
        (router(AppState::new(pipeline.status())), metrics)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = app();
        let (status, body) = get_body(app, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["data"]["status"], "ok");
        assert_eq!(v["data"]["remediation_enabled"], false);
    }

    #[tokio::test]
    async fn json_metrics_reflect_counters() {
        let (app, metrics) = app();
        metrics.inc_events_consumed();
        metrics.inc_events_malformed();
        let (_, body) = get_body(app, "/api/v1/metrics").await;
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["data"]["counters"]["events_consumed"], 1);
        assert_eq!(v["data"]["counters"]["events_malformed"], 1);
        assert_eq!(v["data"]["gauges"]["remediation_in_flight"], 0);
    }

    #[tokio::test]
    async fn prometheus_text_is_served() {
        let (app, metrics) = app();
        metrics.inc_alerts_generated();
        let (status, body) = get_body(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("logpulse_alerts_generated_total 1"));
        assert!(body.contains("logpulse_open_windows 0"));
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let (app, _) = app();
        let (status, _) = get_body(app, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
