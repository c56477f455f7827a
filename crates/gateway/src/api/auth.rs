//! `GET /aws-auth/{accessKeyId}`, `POST /aws-verify?method=...&url=...` (§6).

use std::collections::BTreeMap;

use axum::extract::{Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use idg_core::keys::{accesskey_key, uuid_key};
use idg_core::model::{Record, Uuid};
use idg_core::VerifyError;
use idg_sigv4::{verify_request, QueryOverrides, VerifyRequest};
use idg_store::decode_json;
use serde_json::json;

use crate::error::GatewayError;
use crate::query;
use crate::AppState;

/// Strips secrets from a record before it leaves the process (§6
/// "`/aws-auth/{accessKeyId}` — returns the user record (redacted)").
fn redact(mut record: Record) -> Record {
    match &mut record {
        Record::Account(a) => {
            a.accesskeys.clear();
            a.keys.clear();
        }
        Record::User(u) => {
            u.accesskeys.clear();
            u.keys.clear();
        }
        _ => {}
    }
    record
}

/// GET /aws-auth/{accessKeyId}
pub async fn get_by_access_key(
    State(state): State<AppState>,
    Path(access_key_id): Path<String>,
) -> impl IntoResponse {
    let result = async {
        let uuid_raw = state
            .store
            .get(&accesskey_key(&access_key_id))
            .await?
            .ok_or_else(|| VerifyError::InvalidAccessKey(access_key_id.clone()))?;
        let uuid = Uuid::new_unchecked(uuid_raw);
        let key = uuid_key(&uuid);
        let raw = state
            .store
            .get(&key)
            .await?
            .ok_or_else(|| VerifyError::UserNotFound(uuid.as_str().to_owned()))?;
        let record: Record = decode_json(&key, &raw)?;
        Ok::<_, GatewayError>(redact(record))
    }
    .await;

    match result {
        Ok(record) => Json(record).into_response(),
        Err(e) => e.into_response(),
    }
}

fn header_map_to_btree(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.as_str().to_owned(), v.to_str().unwrap_or_default().to_owned()))
        .collect()
}

/// POST /aws-verify?method=...&url=...
pub async fn verify(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    let raw = raw.unwrap_or_default();
    let query = QueryOverrides {
        method: query::first(&raw, "method"),
        url: query::first(&raw, "url"),
        session_token: query::first(&raw, "sessionToken"),
    };
    let header_map = header_map_to_btree(&headers);
    let req = VerifyRequest {
        method: "GET",
        url: "/",
        headers: &header_map,
        query,
    };

    let now = chrono::Utc::now();
    let result = verify_request(
        state.store.as_ref(),
        state.token_verifier.as_ref(),
        &req,
        now,
        state.config.sigv4.max_skew_seconds,
    )
    .await;

    match result {
        Ok(principal) => {
            state.verify_metrics.record(true);
            Json(json!({
                "valid": true,
                "accessKeyId": principal.access_key_id,
                "userUuid": principal.user_uuid.as_str(),
            }))
            .into_response()
        }
        Err(e) => {
            state.verify_metrics.record(false);
            GatewayError::from(e).into_response()
        }
    }
}
