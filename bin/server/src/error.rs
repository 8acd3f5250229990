//! Domain error types for server operations.
//!
//! [`ApiError`] is what handlers return; it maps engine and store errors onto
//! HTTP statuses and renders a JSON body. [`StartupError`] covers process
//! startup and is reported through rootcause.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lantern_workflow::{EngineError, StoreError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The addressed resource does not exist.
    NotFound { message: String },
    /// The request is malformed.
    BadRequest { message: String },
    /// The request is well-formed but its content is unusable.
    Unprocessable { message: String },
    /// The resource is in a state that does not allow the operation.
    Conflict { message: String },
    /// A backing service failed; the request may succeed later.
    Unavailable { message: String },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::NotFound { message }
            | Self::BadRequest { message }
            | Self::Unprocessable { message }
            | Self::Conflict { message }
            | Self::Unavailable { message } => message,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.status())
    }
}

impl std::error::Error for ApiError {}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let message = e.to_string();
        match e {
            EngineError::WorkflowNotFound { .. } | EngineError::ExecutionNotFound { .. } => {
                Self::NotFound { message }
            }
            EngineError::Graph(_) => Self::Unprocessable { message },
            EngineError::InvalidState { .. } => Self::Conflict { message },
            EngineError::Contention { .. } => Self::Conflict { message },
            EngineError::Store(e) => e.into(),
            EngineError::Queue(_) => Self::Unavailable { message },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let message = e.to_string();
        match e {
            StoreError::NotFound { .. } => Self::NotFound { message },
            StoreError::AlreadyExists { .. } | StoreError::VersionConflict { .. } => {
                Self::Conflict { message }
            }
            StoreError::Unavailable { .. } | StoreError::Serialization { .. } => {
                Self::Unavailable { message }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// The database is unreachable or its migrations failed.
    Database { details: String },
    /// The queue is unreachable.
    Queue { details: String },
    /// The listener could not bind or the server failed.
    Server { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Database { details } => write!(f, "database setup failed: {details}"),
            Self::Queue { details } => write!(f, "queue setup failed: {details}"),
            Self::Server { details } => write!(f, "server failed: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}
