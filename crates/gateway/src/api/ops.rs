//! Ambient health/readiness/metrics surface (SPEC_FULL §10).

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::AppState;

/// GET /healthz — process liveness, always 200.
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /readyz — 200 once the replicator has cleared `virgin`, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let ready = !state.driver_metrics.is_virgin();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "ready": ready })))
}

/// GET /metrics — Prometheus-style plain text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let m = &state.driver_metrics;
    let v = &state.verify_metrics;
    let body = format!(
        "# TYPE idg_replicator_change_number gauge\n\
         # HELP idg_replicator_change_number Highest change number applied to the store.\n\
         idg_replicator_change_number {}\n\
         # TYPE idg_replicator_entries_applied_total counter\n\
         # HELP idg_replicator_entries_applied_total Changelog entries applied since startup.\n\
         idg_replicator_entries_applied_total {}\n\
         # TYPE idg_replicator_errors_total counter\n\
         # HELP idg_replicator_errors_total Transform/store errors encountered since startup.\n\
         idg_replicator_errors_total {}\n\
         # TYPE idg_verify_requests_total counter\n\
         # HELP idg_verify_requests_total SigV4 verify requests by result.\n\
         idg_verify_requests_total{{result=\"accepted\"}} {}\n\
         idg_verify_requests_total{{result=\"rejected\"}} {}\n",
        m.change_number.load(Ordering::Relaxed),
        m.entries_applied.load(Ordering::Relaxed),
        m.errors.load(Ordering::Relaxed),
        v.accepted.load(Ordering::Relaxed),
        v.rejected.load(Ordering::Relaxed),
    );
    ([("content-type", "text/plain; version=0.0.4")], body)
}
