//! Prometheus metrics and probe endpoints.
//!
//! Serves `/metrics`, `/healthz` and `/readyz`. Readiness flips once the
//! watchers are running.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Reconciliation metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    failures: IntCounterVec,
    duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let reconciliations = IntCounterVec::new(
            Opts::new("controlplane_reconciliations_total", "Successful reconciliations"),
            &["resource"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("controlplane_reconcile_failures_total", "Failed reconciliations by error kind"),
            &["resource", "kind"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("controlplane_reconcile_duration_seconds", "Reconciliation duration")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]),
            &["resource"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self {
            registry,
            reconciliations,
            failures,
            duration,
        })
    }

    pub fn reconciled(&self, resource: &str, elapsed: Duration) {
        self.reconciliations.with_label_values(&[resource]).inc();
        self.duration.with_label_values(&[resource]).observe(elapsed.as_secs_f64());
    }

    pub fn reconcile_failed(&self, resource: &str, kind: &str, elapsed: Duration) {
        self.failures.with_label_values(&[resource, kind]).inc();
        self.duration.with_label_values(&[resource]).observe(elapsed.as_secs_f64());
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[derive(Clone)]
struct ProbeState {
    metrics: Metrics,
    ready: Arc<AtomicBool>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Router for the metrics and probe endpoints
pub fn router(metrics: Metrics, ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(self::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(ProbeState { metrics, ready })
}

/// Serve `router` on `addr` until the process exits
pub async fn serve(addr: SocketAddr, router: Router) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics and probes listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_readiness_follows_flag() {
        let ready = Arc::new(AtomicBool::new(false));
        let router = router(Metrics::new().unwrap(), Arc::clone(&ready));

        assert_eq!(get(router.clone(), "/healthz").await.0, StatusCode::OK);
        assert_eq!(get(router.clone(), "/readyz").await.0, StatusCode::SERVICE_UNAVAILABLE);
        ready.store(true, Ordering::Relaxed);
        assert_eq!(get(router, "/readyz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposes_failures_by_kind() {
        let metrics = Metrics::new().unwrap();
        metrics.reconciled("Component", Duration::from_millis(20));
        metrics.reconcile_failed("Component", "image-unavailable", Duration::from_millis(5));

        let (status, body) = get(router(metrics, Arc::new(AtomicBool::new(true))), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("controlplane_reconciliations_total{resource=\"Component\"} 1"));
        assert!(body.contains("kind=\"image-unavailable\""));
    }
}
