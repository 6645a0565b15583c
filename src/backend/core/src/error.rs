//! Error handling for Offertory Core.
//!
//! This module provides:
//! - Error types with context and chaining
//! - HTTP status code mapping for API responses
//! - Stable error codes for machine-readable API responses
//! - User-friendly messages vs detailed internal messages

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// A specialized Result type for Offertory operations.
pub type Result<T> = std::result::Result<T, OffertoryError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic
/// error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Database errors
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    SchemaIntegrityFailed,

    // Incident ledger errors
    IncidentNotFound,
    IncidentStoreError,

    // External integration errors
    IntegrationError,
    IntegrationAuthFailed,
    IntegrationRateLimited,
    IntegrationTimeout,
    NetworkError,

    // Configuration errors
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Serialization errors
    SerializationError,

    // Service state
    ServiceNotReady,

    // Validation
    ValidationError,

    // Internal
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::IncidentNotFound => StatusCode::NOT_FOUND,

            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,

            Self::IntegrationRateLimited => StatusCode::TOO_MANY_REQUESTS,

            Self::IntegrationTimeout => StatusCode::GATEWAY_TIMEOUT,

            Self::DatabaseConnectionFailed | Self::ServiceNotReady => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Self::IntegrationError | Self::IntegrationAuthFailed | Self::NetworkError => {
                StatusCode::BAD_GATEWAY
            }

            Self::DatabaseError
            | Self::DatabaseQueryFailed
            | Self::SchemaIntegrityFailed
            | Self::IncidentStoreError
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError
            | Self::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnectionFailed
                | Self::DatabaseQueryFailed
                | Self::IntegrationRateLimited
                | Self::IntegrationTimeout
                | Self::NetworkError
                | Self::ServiceNotReady
        )
    }

    /// Get the error category for grouping in logs and metrics.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::DatabaseError
            | Self::DatabaseConnectionFailed
            | Self::DatabaseQueryFailed
            | Self::SchemaIntegrityFailed => "database",
            Self::IncidentNotFound | Self::IncidentStoreError => "incidents",
            Self::IntegrationError
            | Self::IntegrationAuthFailed
            | Self::IntegrationRateLimited
            | Self::IntegrationTimeout
            | Self::NetworkError => "integration",
            Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration => "configuration",
            Self::SerializationError => "serialization",
            Self::ServiceNotReady => "availability",
            Self::ValidationError => "validation",
            Self::InternalError | Self::UnknownError => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Offertory Core.
///
/// Supports structured error codes, error chaining, and a split between
/// the user-facing message and the internal message that only reaches logs.
#[derive(Error, Debug)]
pub struct OffertoryError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for OffertoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl OffertoryError {
    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create an incident-not-found error.
    pub fn incident_not_found(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::IncidentNotFound,
            format!("Incident not found: {}", id),
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Attach a source error.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message, if any.
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "offertory_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category(),
        )
        .increment(1);
    }

    /// Log this error at the appropriate level.
    pub fn log(&self) {
        if self.code.http_status().is_server_error() {
            error!(
                code = %self.code,
                category = self.code.category(),
                internal = self.internal_message.as_deref().unwrap_or(""),
                "{}",
                self.user_message
            );
        } else {
            warn!(code = %self.code, "{}", self.user_message);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for OffertoryError {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ErrorCode::DatabaseConnectionFailed
            }
            sqlx::Error::RowNotFound => ErrorCode::IncidentNotFound,
            _ => ErrorCode::DatabaseQueryFailed,
        };
        Self::with_internal(code, "Database operation failed", err.to_string()).with_source(err)
    }
}

impl From<reqwest::Error> for OffertoryError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::IntegrationTimeout
        } else if err.is_connect() {
            ErrorCode::NetworkError
        } else {
            ErrorCode::IntegrationError
        };
        Self::with_internal(code, "External integration request failed", err.to_string())
            .with_source(err)
    }
}

impl From<serde_json::Error> for OffertoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Serialization failed",
            err.to_string(),
        )
        .with_source(err)
    }
}

impl From<std::io::Error> for OffertoryError {
    fn from(err: std::io::Error) -> Self {
        Self::with_internal(
            ErrorCode::IncidentStoreError,
            "File store operation failed",
            err.to_string(),
        )
        .with_source(err)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializable error body returned by the API.
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    error_code: ErrorCode,
    retryable: bool,
}

impl IntoResponse for OffertoryError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.code.http_status();
        let body = ErrorBody {
            success: false,
            error: self.user_message.into_owned(),
            error_code: self.code,
            retryable: self.code.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OffertoryError::new(ErrorCode::DatabaseError, "query failed");
        assert_eq!(format!("{}", err), "[DatabaseError] query failed");

        let err = OffertoryError::with_internal(
            ErrorCode::DatabaseError,
            "query failed",
            "relation \"incidents\" does not exist",
        );
        assert!(format!("{}", err).contains("internal:"));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            ErrorCode::IncidentNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorCode::ServiceNotReady.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::IntegrationAuthFailed.http_status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ErrorCode::InternalError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorCode::DatabaseConnectionFailed.is_retryable());
        assert!(ErrorCode::NetworkError.is_retryable());
        assert!(!ErrorCode::IncidentNotFound.is_retryable());
        assert!(!ErrorCode::InvalidConfiguration.is_retryable());
    }

    #[test]
    fn test_category() {
        assert_eq!(ErrorCode::DatabaseError.category(), "database");
        assert_eq!(ErrorCode::IntegrationTimeout.category(), "integration");
        assert_eq!(ErrorCode::MissingConfiguration.category(), "configuration");
    }

    #[test]
    fn test_user_vs_internal_message() {
        let err = OffertoryError::internal("pool exhausted after 30s");
        assert_eq!(err.user_message(), "An internal error occurred");
        assert_eq!(err.internal_message(), Some("pool exhausted after 30s"));
    }

    #[test]
    fn test_incident_not_found_constructor() {
        let err = OffertoryError::incident_not_found("abc-123");
        assert_eq!(err.code(), ErrorCode::IncidentNotFound);
        assert!(err.user_message().contains("abc-123"));
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::ServiceNotReady).unwrap();
        assert_eq!(json, "\"SERVICE_NOT_READY\"");
    }
}
