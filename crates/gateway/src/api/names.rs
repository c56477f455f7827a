//! `GET /uuids?account=X&type=Y&name=Z1&name=Z2`, `GET /names?uuid=X1&uuid=X2` (§6).

use axum::extract::{RawQuery, State};
use axum::response::{IntoResponse, Json};
use idg_core::keys::{group_name_key, policy_name_key, role_name_key, user_login_key};
use idg_core::model::{Record, Uuid};
use idg_store::decode_json;
use serde_json::json;

use crate::error::GatewayError;
use crate::query;
use crate::AppState;

fn name_key(kind: &str, account: &Uuid, name: &str) -> Option<String> {
    match kind {
        "user" => Some(user_login_key(account, name)),
        "role" => Some(role_name_key(account, name)),
        "policy" => Some(policy_name_key(account, name)),
        "group" => Some(group_name_key(account, name)),
        _ => None,
    }
}

/// GET /uuids?account=X&type=Y&name=Z1&name=Z2 — batch name-to-uuid.
/// Names with no matching record are omitted from the result, not errored;
/// the caller asked for a best-effort batch, not an all-or-nothing lookup.
pub async fn batch_uuids(State(state): State<AppState>, RawQuery(raw): RawQuery) -> impl IntoResponse {
    let raw = raw.unwrap_or_default();
    let account = match query::first(&raw, "account") {
        Some(a) => Uuid::new_unchecked(a),
        None => return GatewayError::BadRequest("missing account".into()).into_response(),
    };
    let kind = match query::first(&raw, "type") {
        Some(t) => t,
        None => return GatewayError::BadRequest("missing type".into()).into_response(),
    };
    let names = query::values(&raw, "name");

    let mut out = serde_json::Map::new();
    for name in names {
        let Some(key) = name_key(&kind, &account, &name) else {
            return GatewayError::BadRequest(format!("unknown type: {kind}")).into_response();
        };
        match state.store.get(&key).await {
            Ok(Some(uuid)) => {
                out.insert(name, json!(uuid));
            }
            Ok(None) => {}
            Err(e) => return GatewayError::from(e).into_response(),
        }
    }

    Json(out).into_response()
}

fn record_summary(record: &Record) -> (&'static str, &str) {
    match record {
        Record::Account(a) => ("account", a.login.as_str()),
        Record::User(u) => ("user", u.login.as_str()),
        Record::Role(r) => ("role", r.name.as_str()),
        Record::Policy(p) => ("policy", p.name.as_str()),
        Record::Group(g) => ("group", g.name.as_str()),
    }
}

/// GET /names?uuid=X1&uuid=X2 — batch uuid-to-name. Unknown uuids are
/// omitted from the result.
pub async fn batch_names(State(state): State<AppState>, RawQuery(raw): RawQuery) -> impl IntoResponse {
    let raw = raw.unwrap_or_default();
    let uuids = query::values(&raw, "uuid");

    let mut out = serde_json::Map::new();
    for uuid_raw in uuids {
        let uuid = Uuid::new_unchecked(uuid_raw.clone());
        let key = idg_core::keys::uuid_key(&uuid);
        match state.store.get(&key).await {
            Ok(Some(raw_record)) => match decode_json::<Record>(&key, &raw_record) {
                Ok(record) => {
                    let (kind, name) = record_summary(&record);
                    out.insert(uuid_raw, json!({ "type": kind, "name": name }));
                }
                Err(e) => return GatewayError::from(e).into_response(),
            },
            Ok(None) => {}
            Err(e) => return GatewayError::from(e).into_response(),
        }
    }

    Json(out).into_response()
}
