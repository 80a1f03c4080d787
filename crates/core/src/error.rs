//! Closed error taxonomy shared by every component.
//!
//! Each component classifies its own failures at the point of detection
//! (§7 propagation policy); nothing downstream re-classifies a [`CoreError`]
//! it did not itself produce.

use serde::Serialize;
use time::OffsetDateTime;

/// The closed set of error categories from §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorCategory {
    Authentication,
    Validation,
    Permission,
    RateLimit,
    Network,
    Upstream,
    Timeout,
    CircuitOpen,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Per-field diagnostic attached to a `Validation` failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldDiagnostic {
    pub field: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("invalid arguments")]
    Validation(Vec<FieldDiagnostic>),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("rate limited")]
    RateLimit,

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream error (status {status:?}): {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("operation timed out")]
    Timeout,

    #[error("circuit open for tool `{tool}`")]
    CircuitOpen { tool: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Authentication(_) => ErrorCategory::Authentication,
            CoreError::Validation(_) => ErrorCategory::Validation,
            CoreError::Permission(_) => ErrorCategory::Permission,
            CoreError::RateLimit => ErrorCategory::RateLimit,
            CoreError::Network(_) => ErrorCategory::Network,
            CoreError::Upstream { .. } => ErrorCategory::Upstream,
            CoreError::Timeout => ErrorCategory::Timeout,
            CoreError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            CoreError::NotFound(_) => ErrorCategory::NotFound,
            CoreError::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CoreError::Authentication(_) | CoreError::Permission(_) => Severity::High,
            CoreError::Validation(_) | CoreError::NotFound(_) => Severity::Low,
            CoreError::RateLimit | CoreError::Timeout => Severity::Medium,
            CoreError::Network(_) | CoreError::Upstream { .. } => Severity::Medium,
            CoreError::CircuitOpen { .. } => Severity::Medium,
            CoreError::Internal(_) => Severity::Critical,
        }
    }

    /// §7 retryability table.
    pub fn retryable(&self) -> bool {
        match self {
            CoreError::RateLimit | CoreError::Network(_) | CoreError::Timeout => true,
            CoreError::Upstream { status, .. } => matches!(status, Some(s) if *s >= 500),
            _ => false,
        }
    }

    /// Stable string identifying this error kind across versions.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Authentication(_) => "authentication_failed",
            CoreError::Validation(_) => "invalid_arguments",
            CoreError::Permission(_) => "permission_denied",
            CoreError::RateLimit => "throttled",
            CoreError::Network(_) => "network_error",
            CoreError::Upstream { .. } => "upstream_error",
            CoreError::Timeout => "timeout",
            CoreError::CircuitOpen { .. } => "tool_unavailable",
            CoreError::NotFound(_) => "not_found",
            CoreError::Internal(_) => "internal_error",
        }
    }

    /// Wrap an opaque downstream failure as `Internal`, preserving its
    /// message, per §7's propagation policy for the Dispatcher.
    pub fn wrap_unknown(message: impl Into<String>) -> Self {
        CoreError::Internal(message.into())
    }

    pub fn into_envelope(&self) -> ErrorEnvelope {
        let details = match self {
            CoreError::Validation(fields) => {
                Some(serde_json::json!({ "fields": fields }))
            }
            CoreError::Upstream { status, .. } => {
                Some(serde_json::json!({ "status": status }))
            }
            CoreError::Internal(message) => Some(serde_json::json!({ "original": message })),
            _ => None,
        };
        ErrorEnvelope {
            is_error: true,
            error_code: self.error_code().to_string(),
            category: self.category(),
            severity: self.severity(),
            retryable: self.retryable(),
            message: self.to_string(),
            details,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// The §6.3 wire shape for a failed `tools/call`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "isError")]
    pub is_error: bool,
    #[serde(rename = "errorCode")]
    pub error_code: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

pub type CoreResult<T> = Result<T, CoreError>;
