//! HTTP surface.
//!
//! Health endpoints, the Prometheus exporter, and the `/ops` admin
//! routes over the supervision subsystem. Authorization for `/ops` is
//! enforced by the reverse proxy in front of this service; `POST
//! /ops/recover` additionally sits behind the proxy's elevated-admin
//! policy.
//!
//! All handlers return `Result<impl IntoResponse, OffertoryError>` so
//! errors map to consistent JSON through the `IntoResponse`
//! implementation on `OffertoryError`.

pub mod middleware;
pub mod ops;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::supervision::{
    HealthOrchestrator, IncidentLedger, RecoveryCoordinator, Watchdog,
};
use crate::telemetry::MetricsHandle;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<HealthOrchestrator>,
    pub ledger: Arc<IncidentLedger>,
    pub recovery: Arc<RecoveryCoordinator>,
    pub watchdog: Arc<Watchdog>,
    pub metrics: Option<MetricsHandle>,
}

/// Standard response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Build the full router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health/live", get(ops::liveness))
        .route("/health/ready", get(ops::readiness))
        .route("/metrics", get(ops::prometheus_metrics))
        .route("/ops/status", get(ops::status))
        .route("/ops/incidents", get(ops::list_incidents))
        .route("/ops/incidents/:id/resolve", post(ops::resolve_incident))
        .route("/ops/run-checks", post(ops::run_checks))
        .route("/ops/recover", post(ops::recover))
        .route("/ops/recovery-stats", get(ops::recovery_stats))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::readiness_gate,
        ))
        .layer(axum_middleware::from_fn(middleware::request_id_headers))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
