//! API error handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    UnprocessableEntity(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::UnprocessableEntity(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<qid_core::Error> for ApiError {
    fn from(err: qid_core::Error) -> Self {
        match err {
            qid_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            qid_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            qid_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            qid_core::Error::InvalidState(msg) => ApiError::UnprocessableEntity(msg),
            qid_core::Error::Transport(msg) => ApiError::Internal(msg),
        }
    }
}
