//! Error handling for the CRM core.
//!
//! This module provides:
//! - A single crate error type with a stable, machine-readable [`ErrorCode`]
//! - HTTP status code mapping for API responses
//! - User-facing messages kept apart from internal diagnostic messages
//! - Severity-driven logging through `tracing` and an error counter metric
//!
//! # Usage
//!
//! ```rust,ignore
//! use crm_core::error::{CrmError, Result};
//!
//! fn load(id: LeadId) -> Result<Lead> {
//!     store.find(id)?.ok_or_else(|| CrmError::not_found("lead", id.to_string()))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for CRM operations.
pub type Result<T> = std::result::Result<T, CrmError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Tenancy Errors (1000-1099)
    DuplicateProfile,
    OrganizationRequired,
    IdentityInactive,

    // Authorization Errors (1100-1199)
    Unauthorized,
    PermissionDenied,
    InvalidToken,
    TokenExpired,

    // Pipeline Errors (1200-1299)
    StageNotFound,
    PipelineNotFound,

    // Record Errors (2000-2099)
    NotFound,
    Conflict,
    DuplicateRecord,

    // Database Errors (2100-2199)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseTransactionFailed,

    // Serialization Errors (2200-2299)
    SerializationError,

    // External Collaborator Errors (3000-3099)
    DependencyFailure,

    // Validation Errors (4100-4199)
    ValidationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::DuplicateProfile => 1000,
            Self::OrganizationRequired => 1001,
            Self::IdentityInactive => 1002,

            Self::Unauthorized => 1100,
            Self::PermissionDenied => 1101,
            Self::InvalidToken => 1102,
            Self::TokenExpired => 1103,

            Self::StageNotFound => 1200,
            Self::PipelineNotFound => 1201,

            Self::NotFound => 2000,
            Self::Conflict => 2001,
            Self::DuplicateRecord => 2002,

            Self::DatabaseError => 2100,
            Self::DatabaseConnectionFailed => 2101,
            Self::DatabaseTransactionFailed => 2102,

            Self::SerializationError => 2200,

            Self::DependencyFailure => 3000,

            Self::ValidationError => 4100,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::StageNotFound | Self::PipelineNotFound => StatusCode::NOT_FOUND,

            Self::DuplicateProfile | Self::DuplicateRecord | Self::Conflict => StatusCode::CONFLICT,

            Self::ValidationError | Self::OrganizationRequired => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            Self::Unauthorized | Self::InvalidToken | Self::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }

            Self::PermissionDenied | Self::IdentityInactive => StatusCode::FORBIDDEN,

            Self::DatabaseConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,

            Self::DependencyFailure => StatusCode::BAD_GATEWAY,

            Self::DatabaseError
            | Self::DatabaseTransactionFailed
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnectionFailed
                | Self::DatabaseTransactionFailed
                | Self::DependencyFailure
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "tenancy",
            1100..=1199 => "authorization",
            1200..=1299 => "pipeline",
            2000..=2099 => "record",
            2100..=2199 => "database",
            2200..=2299 => "serialization",
            3000..=3099 => "dependency",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            _ => "internal",
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

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, missing records, denied access)
    Low,
    /// Degraded collaborators
    Medium,
    /// System errors (database failures, bugs)
    High,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::DuplicateProfile
            | ErrorCode::OrganizationRequired
            | ErrorCode::IdentityInactive
            | ErrorCode::Unauthorized
            | ErrorCode::PermissionDenied
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired
            | ErrorCode::StageNotFound
            | ErrorCode::PipelineNotFound
            | ErrorCode::NotFound
            | ErrorCode::Conflict
            | ErrorCode::DuplicateRecord
            | ErrorCode::ValidationError => Self::Low,

            ErrorCode::DependencyFailure | ErrorCode::DatabaseConnectionFailed => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseTransactionFailed
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InternalError => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none() && self.suggested_action.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the CRM core.
#[derive(Error, Debug)]
pub struct CrmError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for CrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl CrmError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
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
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a not found error.
    ///
    /// Used both for absent records and for records owned by another
    /// organization; callers cannot tell the two apart.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::NotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error. The message is surfaced verbatim.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a permission denied error for a `resource:action` pair.
    pub fn permission_denied(resource: &str, action: &str) -> Self {
        let permission = format!("{}:{}", resource, action);
        Self::new(
            ErrorCode::PermissionDenied,
            format!("Permission denied: {}", permission),
        )
        .with_context("permission", permission)
    }

    /// Create a generic conflict error.
    pub fn conflict(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace the error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        let context = std::mem::take(&mut self.details.context);
        self.details = details;
        self.details.context.extend(context);
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Request failed"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Request degraded"
                );
            }
            ErrorSeverity::Low => {
                info!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "crm_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&CrmError> for ErrorResponse {
    fn from(error: &CrmError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for CrmError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for CrmError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (ErrorCode::NotFound, "The requested record was not found"),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                    return Self::with_internal(
                        ErrorCode::DuplicateRecord,
                        "A record with this identifier already exists",
                        format!("Constraint violation: {}", constraint),
                    )
                    .with_context("constraint", constraint)
                    .with_source(error);
                }
                (ErrorCode::DatabaseError, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for CrmError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::DatabaseError,
            "Database migration failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for CrmError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<reqwest::Error> for CrmError {
    fn from(error: reqwest::Error) -> Self {
        let user_msg = if error.is_timeout() {
            "External service request timed out"
        } else if error.is_connect() {
            "Failed to connect to external service"
        } else if error.is_status() {
            "External service returned an error"
        } else {
            "External service call failed"
        };

        Self::with_internal(ErrorCode::DependencyFailure, user_msg, error.to_string())
            .with_source(error)
    }
}

impl From<anyhow::Error> for CrmError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<CrmError>() {
            Ok(crm_error) => crm_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for CrmError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl CrmError {
    /// An identity already holds a profile of this kind.
    pub fn duplicate_profile(kind: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::DuplicateProfile,
            format!("A {} profile already exists for this identity", kind),
        )
        .with_context("profile_kind", kind.to_string())
    }

    /// A vendor or employee profile cannot be active without an organization.
    pub fn organization_required(kind: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::OrganizationRequired,
            format!("A {} profile requires an organization", kind),
        )
        .with_context("profile_kind", kind.to_string())
    }

    /// The target stage does not exist; `valid_stages` lists the names the
    /// caller may use instead.
    pub fn stage_not_found(target: impl Into<String>, valid_stages: Vec<String>) -> Self {
        let target = target.into();
        let suggestion = if valid_stages.is_empty() {
            "The organization has no active pipeline stages".to_string()
        } else {
            format!("Valid stages: {}", valid_stages.join(", "))
        };
        Self::new(ErrorCode::StageNotFound, format!("Stage not found: {}", target))
            .with_details(
                ErrorDetails::new()
                    .with_entity("stage", &target)
                    .with_suggestion(suggestion),
            )
            .with_context("valid_stages", valid_stages)
    }

    /// A best-effort external collaborator failed.
    pub fn dependency_failure(integration: &str, message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::DependencyFailure,
            format!("Integration '{}' failed", integration),
            message,
        )
        .with_context("integration", integration)
    }

    /// Valid stage names carried by a [`ErrorCode::StageNotFound`] error.
    pub fn valid_stages(&self) -> Vec<String> {
        self.details
            .context
            .get("valid_stages")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
