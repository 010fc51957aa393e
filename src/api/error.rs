//! Mapping from domain errors to HTTP responses
//!
//! Callers get a fixed message per error kind; the underlying error text
//! goes to the log only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{Error, ErrorCategory, MigratorErrorTrait};
use crate::jobs::JobError;
use crate::lifecycle::LifecycleError;

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub kind: &'static str,
}

impl ErrorResponse {
    pub fn new(kind: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            kind: kind.as_str(),
        }
    }
}

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    category: ErrorCategory,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Request rejected before reaching the engine
    pub fn bad_request(detail: impl AsRef<str>) -> Self {
        warn!(detail = detail.as_ref(), "Rejected API request");
        Self {
            status: StatusCode::BAD_REQUEST,
            category: ErrorCategory::Validation,
        }
    }

    pub fn internal(detail: impl AsRef<str>) -> Self {
        error!(detail = detail.as_ref(), "API request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            category: ErrorCategory::Other,
        }
    }

    fn public_message(&self) -> &'static str {
        match self.category {
            ErrorCategory::Validation => "Invalid request",
            ErrorCategory::Conflict => "Conflicts with an operation already in progress",
            ErrorCategory::NotFound => "Resource not found",
            _ => "Internal server error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let category = err.category();
        let status = match category {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %err, category = category.as_str(), "API request failed");
        } else {
            warn!(error = %err, category = category.as_str(), "API request rejected");
        }

        Self { status, category }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Error::from(err).into()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Error::from(err).into()
    }
}

impl From<crate::storage::StoreError> for ApiError {
    fn from(err: crate::storage::StoreError) -> Self {
        Error::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.category, self.public_message());
        (self.status, Json(body)).into_response()
    }
}
