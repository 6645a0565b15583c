//! Request middleware.

use axum::{
    extract::{Request, State},
    http::{
        header::{HeaderName, HeaderValue},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::AppState;

/// Short-circuits non-health traffic with 503 while the watchdog is not
/// ready, instead of letting requests fail against a broken store.
///
/// Health endpoints always answer so an external prober can tell "the
/// process is alive" from "the process is ready". `/ops/status` and
/// `/metrics` stay reachable so operators can see the outage being
/// reported; the rest of the admin surface waits like everything else.
pub async fn readiness_gate(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    let exempt = path.starts_with("/health") || path == "/ops/status" || path == "/metrics";

    if !exempt && !state.watchdog.is_ready() {
        let mut response = (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "success": false,
                "error": "Service is temporarily unavailable while reconnecting to its database; retry shortly",
                "error_code": "SERVICE_NOT_READY",
                "retryable": true,
            })),
        )
            .into_response();
        response.headers_mut().insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from_static("30"),
        );
        return response;
    }

    next.run(req).await
}

/// Propagates or generates an `x-request-id` header on every response.
pub async fn request_id_headers(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        let _ = response
            .headers_mut()
            .try_insert(HeaderName::from_static("x-request-id"), value);
    }
    response
}
