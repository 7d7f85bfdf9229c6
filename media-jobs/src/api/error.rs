//! Error bodies returned by the job API.
//!
//! Every failure leaves the server as `{code, message, details?}` with a
//! status code derived from the crate error.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Stable machine readable tag, e.g. `JOB_FAILED`.
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// A handler failure carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 409: the job exists but is not in a state that allows the request.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 410: the job failed and will never produce outputs.
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, "JOB_FAILED", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("no {entity_type} `{id}`"))
            }
            Error::Validation(msg) => ApiError::validation(msg),
            Error::NotReady { id, status } => {
                ApiError::conflict(format!("job {id} is still {status}"))
                    .with_details(serde_json::json!({ "status": status }))
            }
            Error::InvalidStateTransition { from, to } => {
                ApiError::conflict(format!("job cannot move from {from} to {to}"))
            }
            Error::ResourceExhaustion(msg) => ApiError::service_unavailable(msg),
            Error::Io(_) | Error::IoPath { .. } => {
                tracing::error!(error = %err, "storage failure while serving request");
                ApiError::internal("storage failure")
            }
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::internal("internal error")
            }
        }
    }
}

/// Unreadable submission bodies are validation failures like any other.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

/// What every handler returns.
pub type ApiResult<T> = Result<T, ApiError>;
