//! Error handling for Warden Core.
//!
//! This module provides:
//! - The `WardenError` taxonomy shared by the policy cache, the enforcer and
//!   the persistence layer
//! - Stable machine-readable error codes with HTTP status mapping
//! - Severity-aware logging with tracing integration
//! - Metrics integration for error tracking
//!
//! Store failures, duplicate rules and invalidation failures are all
//! surfaced to the caller unchanged. Nothing in the enforcement path turns an
//! error into a silent allow or a silent deny.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Policy Store Errors (2000-2099)
    StoreUnavailable,
    DuplicateRule,

    // Policy Cache Errors (2100-2199)
    InvalidationFailure,

    // Authorization (4000-4099)
    Forbidden,
    AuthorizationError,

    // Validation Errors (4100-4199)
    InvalidPermission,
    InvalidFilter,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::StoreUnavailable => 2000,
            Self::DuplicateRule => 2001,

            Self::InvalidationFailure => 2100,

            Self::Forbidden => 4001,
            Self::AuthorizationError => 4002,

            Self::InvalidPermission => 4100,
            Self::InvalidFilter => 4101,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Conflict (409)
            Self::DuplicateRule => StatusCode::CONFLICT,

            // Unprocessable Entity (422)
            Self::InvalidPermission | Self::InvalidFilter => StatusCode::UNPROCESSABLE_ENTITY,

            // Forbidden (403)
            Self::Forbidden => StatusCode::FORBIDDEN,

            // Service Unavailable (503)
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            // Internal Server Error (500)
            Self::InvalidationFailure
            | Self::AuthorizationError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::InvalidationFailure)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            2000..=2099 => "store",
            2100..=2199 => "cache",
            4000..=4099 => "authorization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, conflicting grants)
    Low,
    /// Operational issues
    Medium,
    /// System errors (store failures, stale cache)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidPermission
            | ErrorCode::InvalidFilter
            | ErrorCode::DuplicateRule
            | ErrorCode::Forbidden => Self::Low,

            ErrorCode::AuthorizationError => Self::Medium,

            ErrorCode::StoreUnavailable
            | ErrorCode::InvalidationFailure
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Warden Core.
///
/// `Clone` so that the outcome of one shared cache build can be handed to
/// every caller that waited on it. Source errors are flattened into their
/// display form for that reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WardenError {
    /// Reading from or writing to the policy store failed.
    #[error("Policy store unavailable during {operation}: {reason}")]
    StoreUnavailable {
        operation: &'static str,
        reason: String,
    },

    /// A write would create two identical (subject, object, action) rules.
    #[error("Duplicate policy rule: {0}")]
    DuplicateRule(String),

    /// The store write succeeded but the cache could not be invalidated.
    #[error("Policy cache invalidation failed: {0}")]
    InvalidationFailure(String),

    /// A permission record failed validation before reaching the store.
    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    /// A column filter was out of range or empty.
    #[error("Invalid policy filter: {0}")]
    InvalidFilter(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    // ──────────────────────────────────────────────────────────────────────────
    // Constructors
    // ──────────────────────────────────────────────────────────────────────────

    /// Create a store error for the named operation.
    pub fn store(operation: &'static str, reason: impl fmt::Display) -> Self {
        let error = Self::StoreUnavailable {
            operation,
            reason: reason.to_string(),
        };
        error.record_metrics();
        error
    }

    /// Create a duplicate rule error describing the offending triple.
    pub fn duplicate(detail: impl Into<String>) -> Self {
        let error = Self::DuplicateRule(detail.into());
        error.record_metrics();
        error
    }

    pub fn invalidation(reason: impl fmt::Display) -> Self {
        let error = Self::InvalidationFailure(reason.to_string());
        error.record_metrics();
        error
    }

    pub fn invalid_permission(reason: impl Into<String>) -> Self {
        let error = Self::InvalidPermission(reason.into());
        error.record_metrics();
        error
    }

    pub fn invalid_filter(reason: impl Into<String>) -> Self {
        let error = Self::InvalidFilter(reason.into());
        error.record_metrics();
        error
    }

    pub fn internal(reason: impl fmt::Display) -> Self {
        let error = Self::Internal(reason.to_string());
        error.record_metrics();
        error
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Accessors
    // ──────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            Self::DuplicateRule(_) => ErrorCode::DuplicateRule,
            Self::InvalidationFailure(_) => ErrorCode::InvalidationFailure,
            Self::InvalidPermission(_) => ErrorCode::InvalidPermission,
            Self::InvalidFilter(_) => ErrorCode::InvalidFilter,
            Self::Configuration(_) => ErrorCode::ConfigurationError,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the user-friendly message (safe to expose to clients).
    pub fn user_message(&self) -> String {
        match self {
            Self::StoreUnavailable { .. } => {
                "The policy store is currently unavailable".to_string()
            }
            Self::DuplicateRule(_) => {
                "Role already has a conflicting permission; contact an administrator".to_string()
            }
            Self::InvalidationFailure(_) => {
                "Permissions were saved but could not be activated".to_string()
            }
            Self::InvalidPermission(reason) => format!("Invalid permission: {}", reason),
            Self::InvalidFilter(reason) => format!("Invalid filter: {}", reason),
            Self::Configuration(_) | Self::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code().http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code())
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Logging
    // ──────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code();
        let category = code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    internal_message = %self,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    internal_message = %self,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    internal_message = %self,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message(),
                    "Low severity error"
                );
            }
        }
    }

    // ──────────────────────────────────────────────────────────────────────────
    // Metrics
    // ──────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        let code = self.code();
        counter!(
            "warden_errors_total",
            "code" => code.to_string(),
            "category" => code.category().to_string(),
            "retryable" => code.is_retryable().to_string(),
        )
        .increment(1);
    }
}

impl From<config::ConfigError> for WardenError {
    fn from(err: config::ConfigError) -> Self {
        let error = Self::Configuration(err.to_string());
        error.record_metrics();
        error
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl From<&WardenError> for ErrorResponse {
    fn from(error: &WardenError) -> Self {
        Self::new(error.code(), error.user_message())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(WardenError::duplicate("x").http_status(), StatusCode::CONFLICT);
        assert_eq!(
            WardenError::store("load_all", "down").http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            WardenError::invalidation("lost").http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            WardenError::invalid_filter("empty").http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(ErrorCode::StoreUnavailable.category(), "store");
        assert_eq!(ErrorCode::InvalidationFailure.category(), "cache");
        assert_eq!(ErrorCode::Forbidden.category(), "authorization");
        assert_eq!(ErrorCode::InvalidPermission.category(), "validation");
    }

    #[test]
    fn test_duplicate_user_message() {
        let err = WardenError::duplicate("(5, /api/users/*, GET)");
        assert!(err.user_message().contains("contact an administrator"));
        assert!(err.to_string().contains("/api/users/*"));
    }

    #[test]
    fn test_store_error_hides_reason_from_users() {
        let err = WardenError::store("load_all", "connection refused");
        assert!(!err.user_message().contains("refused"));
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse::from(&WardenError::duplicate("x"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "DUPLICATE_RULE");
        assert_eq!(json["error"]["numeric_code"], 2001);
    }
}
