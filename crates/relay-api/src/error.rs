// HTTP-edge error type. Maps client-input/quota failures to their documented
// status codes and anything else to 500, logging the underlying cause
// server-side without leaking internals to the client.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("monthly token quota exhausted ({used}/{quota})")]
    QuotaExceeded { used: i64, quota: i64 },

    #[error(transparent)]
    Storage(#[from] relay_storage::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, detail) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::QuotaExceeded { used, quota } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Monthly token quota exhausted ({used}/{quota})"),
            ),
            ApiError::Storage(err) => {
                tracing::error!(error = %err, "storage error handling chat request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "internal error handling chat request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}
