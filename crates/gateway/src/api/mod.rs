pub mod accounts;
pub mod auth;
pub mod names;
pub mod ops;
pub mod users;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

/// Build the full API router (§6, §10).
pub fn router() -> Router<AppState> {
    Router::new()
        // ── Verification-facing API ────────────────────────────────
        .route("/accounts/:id", get(accounts::get_by_id))
        .route("/accounts", get(accounts::get_by_login))
        .route("/users/:id", get(users::get_by_id))
        .route("/users", get(users::get_by_login))
        .route("/uuids", get(names::batch_uuids))
        .route("/names", get(names::batch_names))
        .route("/aws-auth/:access_key_id", get(auth::get_by_access_key))
        .route("/aws-verify", post(auth::verify))
        // ── Ambient ops surface ─────────────────────────────────────
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
}
