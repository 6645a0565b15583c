//! Health and `/ops` handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{ApiResponse, AppState};
use crate::error::OffertoryError;
use crate::supervision::{
    HealthCheckResult, Incident, IncidentStatus, RecoveryOutcome, RecoveryStats,
    RecoveryTrigger, WatchdogStatus,
};

/// `GET /health/live`. Answers as long as the process runs.
pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "alive",
        "service": "offertory-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health/ready`. 503 while the watchdog holds the server out of
/// rotation.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.watchdog.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
        })),
    )
}

/// `GET /metrics` in Prometheus exposition format.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub overall_healthy: bool,
    pub services: BTreeMap<&'static str, HealthCheckResult>,
    pub open_incident_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub consecutive_degraded_cycles: u32,
    pub watchdog: WatchdogStatus,
}

/// `GET /ops/status`. Last known results; never triggers a new cycle.
pub async fn status(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, OffertoryError> {
    let snapshot = state.orchestrator.snapshot();
    let open_incident_count = state.ledger.active_count().await?;

    let services = snapshot
        .services
        .into_iter()
        .map(|r| (r.dependency.as_str(), r))
        .collect();

    Ok(Json(ApiResponse::success(StatusResponse {
        overall_healthy: snapshot.overall_healthy,
        services,
        open_incident_count,
        last_updated: snapshot.last_updated,
        consecutive_degraded_cycles: snapshot.consecutive_degraded,
        watchdog: state.watchdog.status(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
}

/// `GET /ops/incidents?status=open|investigating|resolved`.
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(filter): Query<IncidentFilter>,
) -> Result<Json<ApiResponse<Vec<Incident>>>, OffertoryError> {
    let incidents = state.ledger.list(filter.status).await?;
    Ok(Json(ApiResponse::success(incidents)))
}

/// `POST /ops/incidents/:id/resolve`. 404 when the id is unknown.
pub async fn resolve_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Incident>>, OffertoryError> {
    let incident = state.ledger.resolve(id).await?;
    Ok(Json(ApiResponse::success(incident)))
}

/// `POST /ops/run-checks`. Forces an immediate orchestrator cycle and
/// returns the fresh result set.
pub async fn run_checks(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, OffertoryError> {
    let results = state.orchestrator.run_now().await;
    let services: BTreeMap<&'static str, HealthCheckResult> = results
        .into_iter()
        .map(|r| (r.dependency.as_str(), r))
        .collect();
    Ok(Json(ApiResponse::success(services)))
}

/// `POST /ops/recover`. Manual trigger; bypasses the cooldown but not
/// the single-run mutual exclusion.
pub async fn recover(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RecoveryOutcome>>, OffertoryError> {
    let outcome = state.recovery.attempt_recovery(RecoveryTrigger::Manual).await;
    Ok(Json(ApiResponse::success(outcome)))
}

/// `GET /ops/recovery-stats`.
pub async fn recovery_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RecoveryStats>>, OffertoryError> {
    Ok(Json(ApiResponse::success(state.recovery.stats())))
}
