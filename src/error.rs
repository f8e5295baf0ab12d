//! Caller-facing error taxonomy and its HTTP rendering.

use crate::audit::{AuditError, AuditKind};
use crate::entitlement::EntitlementError;
use crate::identity::IdentityError;
use crate::security::{DenialCause, Severity, Violation, ViolationKind};
use crate::storage::StorageError;
use crate::stream::StreamError;
use crate::token::TokenError;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Hint sent with `STORAGE_UNAVAILABLE`
pub const STORAGE_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Missing videoId")]
    MissingVideoId,

    #[error("Missing access token")]
    MissingToken,

    #[error("Invalid bearer credential: {0}")]
    InvalidCredential(#[from] IdentityError),

    #[error("{0}")]
    Token(#[from] TokenError),

    #[error("{0}")]
    Violation(#[from] Violation),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Stream failed: {0}")]
    StreamIo(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::MissingVideoId => "MISSING_VIDEO_ID",
            AccessError::MissingToken => "MISSING_TOKEN",
            AccessError::InvalidCredential(_) => "INVALID_CREDENTIAL",
            AccessError::Token(error) => error.code(),
            AccessError::Violation(violation) => violation.code(),
            AccessError::NotFound(_) => "NOT_FOUND",
            AccessError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            AccessError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AccessError::StreamIo(_) => "STREAM_IO_ERROR",
            AccessError::InvalidRequest(_) => "INVALID_REQUEST",
            AccessError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AccessError::MissingVideoId | AccessError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AccessError::MissingToken | AccessError::InvalidCredential(_) => {
                StatusCode::UNAUTHORIZED
            }
            AccessError::Token(_) => StatusCode::FORBIDDEN,
            AccessError::Violation(violation) => match violation.cause {
                DenialCause::LinkExpired => StatusCode::GONE,
                _ => StatusCode::FORBIDDEN,
            },
            AccessError::NotFound(_) => StatusCode::NOT_FOUND,
            AccessError::StorageUnavailable(_) | AccessError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AccessError::StreamIo(_) | AccessError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn violation(&self) -> Option<(ViolationKind, Severity)> {
        match self {
            AccessError::Violation(violation) => Some((violation.kind(), violation.severity())),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AccessError::Violation(violation) => violation.retry_after(),
            AccessError::StorageUnavailable(_) => Some(STORAGE_RETRY_AFTER),
            _ => None,
        }
    }

    /// Pipeline denials are violations; everything else is a plain denial
    pub fn audit_kind(&self) -> AuditKind {
        match self {
            AccessError::Violation(_) => AuditKind::SecurityViolation,
            _ => AuditKind::AccessDenied,
        }
    }
}

impl From<StorageError> for AccessError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(what) => AccessError::NotFound(what),
            StorageError::InvalidLocator(locator) => AccessError::NotFound(locator),
            StorageError::Unavailable(reason) => AccessError::StorageUnavailable(reason),
        }
    }
}

impl From<StreamError> for AccessError {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::NotFound(locator) => AccessError::NotFound(locator),
            StreamError::Unavailable(reason) => AccessError::StorageUnavailable(reason),
            StreamError::Io(reason) => AccessError::StreamIo(reason),
        }
    }
}

impl From<EntitlementError> for AccessError {
    fn from(error: EntitlementError) -> Self {
        match error {
            EntitlementError::NotFound(subject) => AccessError::NotFound(subject),
            other => AccessError::ServiceUnavailable(other.to_string()),
        }
    }
}

impl From<AuditError> for AccessError {
    fn from(error: AuditError) -> Self {
        AccessError::Internal(error.to_string())
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, code = self.code(), error = %self, "Access request failed");
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        });
        if let Some((kind, severity)) = self.violation() {
            body["violation"] = json!(kind);
            body["severity"] = json!(severity);
        }
        let retry_after = self.retry_after().map(|delay| delay.as_secs().max(1));
        if let Some(secs) = retry_after {
            body["retryAfter"] = json!(secs);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
