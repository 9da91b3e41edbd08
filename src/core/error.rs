//! Typed error handling for endpoints
//!
//! Every failure in the request pipeline ends up as an [`EndpointError`],
//! which renders exactly one error envelope:
//!
//! - `{"error": "<message>"}` for single failures
//! - `{"errors": ["<message>", ...]}` for validation failures, even when only
//!   one message is present
//!
//! # Error Categories
//!
//! - [`HookError`]: returned by a registered hook, carries its own status code
//! - [`StorageError`]: returned by the storage collaborator
//! - [`EndpointError`]: the pipeline-level error taxonomy
//!
//! Internal details are logged with `tracing` and never sent to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::core::envelope::ErrorEnvelope;

/// Message returned for unexpected faults
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Message returned when the storage connection is lost
pub const LOST_CONNECTION_MESSAGE: &str = "lost database connection";

/// Error signatures that mean the storage connection went away
const LOST_CONNECTION_SIGNATURES: &[&str] = &["EOF", "no reachable servers", "connection reset"];

/// Error reported by a hook, with the HTTP status it wants to surface.
///
/// A code of zero or less (or one outside the valid HTTP range) resolves to
/// 500 Internal Server Error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
    pub code: i32,
}

impl HookError {
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Hook error without an explicit code (resolves to 500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message, 0)
    }

    pub fn status_code(&self) -> StatusCode {
        u16::try_from(self.code)
            .ok()
            .filter(|code| *code > 0)
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Outcome of a single hook invocation
pub type HookResult = Result<(), HookError>;

/// Errors returned by the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("document not found")]
    NotFound,

    #[error("lost database connection: {0}")]
    LostConnection(String),

    #[error("storage error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error means the connection to storage is gone
    pub fn is_lost_connection(&self) -> bool {
        match self {
            StorageError::LostConnection(_) => true,
            StorageError::Backend(message) => LOST_CONNECTION_SIGNATURES
                .iter()
                .any(|signature| message.contains(signature)),
            StorageError::NotFound => false,
        }
    }
}

/// Pipeline-level error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// Malformed id, filter or body
    #[error("{0}")]
    BadRequest(String),

    /// Model validation failed; every message is reported
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    /// No matching document
    #[error("Not found")]
    NotFound,

    /// Storage rejected persistence
    #[error("{0}")]
    SaveFailed(String),

    /// A hook aborted the pipeline
    #[error(transparent)]
    Hook(#[from] HookError),

    /// The storage connection was lost
    #[error("{}", LOST_CONNECTION_MESSAGE)]
    LostConnection,

    /// Unexpected fault; the detail is logged, not returned
    #[error("{}", INTERNAL_MESSAGE)]
    Internal(String),
}

impl EndpointError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        EndpointError::BadRequest(message.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        EndpointError::Internal(detail.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            EndpointError::BadRequest(_)
            | EndpointError::Validation(_)
            | EndpointError::SaveFailed(_) => StatusCode::BAD_REQUEST,
            EndpointError::NotFound => StatusCode::NOT_FOUND,
            EndpointError::Hook(hook) => hook.status_code(),
            EndpointError::LostConnection | EndpointError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a stable error code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            EndpointError::BadRequest(_) => "BAD_REQUEST",
            EndpointError::Validation(_) => "VALIDATION_FAILED",
            EndpointError::NotFound => "NOT_FOUND",
            EndpointError::SaveFailed(_) => "SAVE_FAILED",
            EndpointError::Hook(_) => "HOOK_ERROR",
            EndpointError::LostConnection => "LOST_CONNECTION",
            EndpointError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to the error envelope sent to the client
    pub fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            EndpointError::Validation(messages) => ErrorEnvelope::multi(messages.clone()),
            other => ErrorEnvelope::single(other.to_string()),
        }
    }
}

impl From<StorageError> for EndpointError {
    fn from(err: StorageError) -> Self {
        if err.is_lost_connection() {
            return EndpointError::LostConnection;
        }
        match err {
            StorageError::NotFound => EndpointError::NotFound,
            other => EndpointError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EndpointError {
    fn from(err: serde_json::Error) -> Self {
        EndpointError::Internal(format!("serialization failed: {err}"))
    }
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            EndpointError::Internal(detail) => {
                tracing::error!(code = self.error_code(), detail = %detail, "request failed")
            }
            EndpointError::LostConnection => {
                tracing::error!(code = self.error_code(), "storage connection lost")
            }
            _ => tracing::debug!(code = self.error_code(), status = %status, "request rejected"),
        }
        (status, self.to_envelope()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hook_error_code_defaults_to_500() {
        assert_eq!(HookError::new("x", 0).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(HookError::new("x", -3).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(HookError::new("x", 42).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(HookError::new("x", 503).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(HookError::internal("x").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(EndpointError::bad_request("bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(EndpointError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            EndpointError::Validation(vec!["a".into()]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EndpointError::SaveFailed("rejected".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EndpointError::from(HookError::new("slow down", 429)).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_envelopes() {
        let single = serde_json::to_value(EndpointError::bad_request("Invalid ID").to_envelope()).unwrap();
        assert_eq!(single, json!({"error": "Invalid ID"}));

        let multi = serde_json::to_value(
            EndpointError::Validation(vec!["Content is required".into()]).to_envelope(),
        )
        .unwrap();
        assert_eq!(multi, json!({"errors": ["Content is required"]}));
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let err = EndpointError::internal("db password is hunter2");
        assert_eq!(err.to_string(), INTERNAL_MESSAGE);
    }

    #[test]
    fn test_storage_error_conversion() {
        assert_eq!(EndpointError::from(StorageError::NotFound), EndpointError::NotFound);
        assert_eq!(
            EndpointError::from(StorageError::Backend("EOF".into())),
            EndpointError::LostConnection
        );
        assert_eq!(
            EndpointError::from(StorageError::Backend("no reachable servers".into())),
            EndpointError::LostConnection
        );
        assert!(StorageError::Backend("read tcp 10.0.0.1: connection reset by peer".into()).is_lost_connection());
        assert!(matches!(
            EndpointError::from(StorageError::Backend("disk full".into())),
            EndpointError::Internal(_)
        ));
        assert_eq!(
            EndpointError::LostConnection.to_string(),
            LOST_CONNECTION_MESSAGE
        );
    }
}
