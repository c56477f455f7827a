//! `GET /users/{id}`, `GET /users?account=X&login=Y&fallback=true` (§6).

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use idg_core::keys::{account_login_key, user_login_key, uuid_key};
use idg_core::model::{Record, Uuid};
use idg_core::VerifyError;
use idg_store::decode_json;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::AppState;

async fn load_user_record(state: &AppState, uuid: &Uuid) -> Result<Record, GatewayError> {
    let key = uuid_key(uuid);
    let raw = state
        .store
        .get(&key)
        .await?
        .ok_or_else(|| VerifyError::UserNotFound(uuid.as_str().to_owned()))?;
    Ok(decode_json(&key, &raw)?)
}

/// GET /users/{id}
pub async fn get_by_id(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let uuid = Uuid::new_unchecked(id);
    match load_user_record(&state, &uuid).await {
        Ok(Record::User(user)) => Json(user).into_response(),
        Ok(_) => GatewayError::from(VerifyError::UserNotFound(uuid.as_str().to_owned())).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    account: String,
    login: String,
    #[serde(default)]
    fallback: bool,
}

/// GET /users?account=X&login=Y&fallback=true — when `fallback` is set and
/// no sub-user matches, falls back to the account's own record if `login`
/// equals the account's login (mirrors how the master account answers for
/// its own identity when no sub-user was created).
pub async fn get_by_login(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> impl IntoResponse {
    let account = Uuid::new_unchecked(params.account.clone());

    let result: Result<Record, GatewayError> = async {
        if let Some(uuid_raw) = state.store.get(&user_login_key(&account, &params.login)).await? {
            let uuid = Uuid::new_unchecked(uuid_raw);
            return load_user_record(&state, &uuid).await;
        }

        if params.fallback {
            if let Some(account_login) = state.store.get(&account_login_key(&params.login)).await? {
                if account_login == params.account {
                    return load_user_record(&state, &account).await;
                }
            }
        }

        Err(VerifyError::UserNotFound(params.login.clone()).into())
    }
    .await;

    match result {
        Ok(record) => Json(record).into_response(),
        Err(e) => e.into_response(),
    }
}
