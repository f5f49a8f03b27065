//! HTTP error responses
//!
//! Maps the crate error taxonomy onto status codes. Every body carries
//! `success: false` and a human-readable `error`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::RetrievalError;
use crate::database::sqlite::models::InvalidDocumentType;
use crate::retrieval::RetrievalConfigError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    #[inline]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A required request field was absent or blank
    #[inline]
    pub fn missing(field: &str) -> Self {
        Self::BadRequest(format!("{} is required", field))
    }
}

impl From<RetrievalError> for ApiError {
    #[inline]
    fn from(error: RetrievalError) -> Self {
        match error {
            RetrievalError::Validation(message) => Self::BadRequest(message),
            RetrievalError::Config(message) => Self::BadRequest(message),
            RetrievalError::NotFound(message) => Self::NotFound(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<RetrievalConfigError> for ApiError {
    #[inline]
    fn from(error: RetrievalConfigError) -> Self {
        Self::BadRequest(error.to_string())
    }
}

impl From<InvalidDocumentType> for ApiError {
    #[inline]
    fn from(error: InvalidDocumentType) -> Self {
        Self::BadRequest(error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    #[inline]
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    #[inline]
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        (
            status,
            Json(json!({
                "success": false,
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}
