//! `GET /accounts/{id}`, `GET /accounts?login=X` (§6).

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use idg_core::keys::{account_login_key, uuid_key};
use idg_core::model::{Record, Uuid};
use idg_core::VerifyError;
use idg_store::decode_json;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::AppState;

async fn load_account(state: &AppState, uuid: &Uuid) -> Result<idg_core::model::AccountRecord, GatewayError> {
    let key = uuid_key(uuid);
    let raw = state
        .store
        .get(&key)
        .await?
        .ok_or_else(|| VerifyError::AccountDoesNotExist(uuid.as_str().to_owned()))?;
    let record: Record = decode_json(&key, &raw)?;
    match record {
        Record::Account(account) => Ok(account),
        _ => Err(VerifyError::AccountDoesNotExist(uuid.as_str().to_owned()).into()),
    }
}

/// GET /accounts/{id}
pub async fn get_by_id(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let uuid = Uuid::new_unchecked(id);
    match load_account(&state, &uuid).await {
        Ok(account) => Json(account).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    login: String,
}

/// GET /accounts?login=X
pub async fn get_by_login(
    State(state): State<AppState>,
    Query(params): Query<LoginQuery>,
) -> impl IntoResponse {
    let result = async {
        let uuid_raw = state
            .store
            .get(&account_login_key(&params.login))
            .await?
            .ok_or_else(|| VerifyError::AccountDoesNotExist(params.login.clone()))?;
        let uuid = Uuid::new_unchecked(uuid_raw);
        load_account(&state, &uuid).await
    }
    .await;

    match result {
        Ok(account) => Json(account).into_response(),
        Err(e) => e.into_response(),
    }
}
