//! HTTP boundary error mapping (§6, §7): composes every layer's error enum
//! into the `{restCode, statusCode, message}` response shape, the same seam
//! the reference workspace's root `error::Error` uses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use idg_core::{StoreError, TransformError, VerifyError};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl GatewayError {
    fn rest_code(&self) -> &'static str {
        match self {
            GatewayError::Verify(e) => e.rest_code(),
            GatewayError::Store(_) => "RedisError",
            GatewayError::Transform(_) => "RedisError",
            GatewayError::NotFound(_) => "NotFound",
            GatewayError::BadRequest(_) => "BadRequest",
        }
    }

    fn status_code(&self) -> StatusCode {
        let code = match self {
            GatewayError::Verify(e) => e.status_code(),
            GatewayError::Store(_) | GatewayError::Transform(_) => 500,
            GatewayError::NotFound(_) => 404,
            GatewayError::BadRequest(_) => 400,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = json!({
            "restCode": self.rest_code(),
            "statusCode": status.as_u16(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
