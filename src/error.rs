use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CortexError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type CortexResult<T> = Result<T, CortexError>;

impl IntoResponse for CortexError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            CortexError::NotFound(detail) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone())
            }
            CortexError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "missing or invalid bearer token".to_string(),
            ),
            CortexError::InvalidRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            CortexError::Internal(err) => {
                tracing::error!("internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "an internal error occurred".to_string(),
                )
            }
        };

        (status, axum::Json(json!({ "code": code, "message": message }))).into_response()
    }
}
