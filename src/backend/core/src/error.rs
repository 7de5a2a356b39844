//! Service-boundary errors.
//!
//! Every failure that reaches a client is an [`AgoraError`]: a stable
//! [`ErrorCode`], a message safe to show the caller, an optional internal
//! message that only goes to the logs, and structured [`ErrorDetails`].
//! Domain errors (`GuardError`, `AuthError`) and dependency errors (sqlx,
//! redis, config) convert into it with `?`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::auth::AuthError;
use crate::guard::GuardError;

pub type Result<T> = std::result::Result<T, AgoraError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes. Serialized names and numeric codes are part
/// of the API and never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    RecordNotFound,
    DuplicateRecord,

    CacheError,
    CacheConnectionFailed,

    SerializationError,
    DeserializationError,

    DependencyUnavailable,

    Unauthorized,
    Forbidden,
    InvalidToken,
    TokenExpired,
    UnknownOperation,

    ValidationError,

    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    InternalError,
}

/// Per-code behaviour, kept in one table so the mappings cannot drift apart.
struct CodeTraits {
    numeric: u32,
    status: StatusCode,
    severity: ErrorSeverity,
    retryable: bool,
}

impl ErrorCode {
    const fn traits(&self) -> CodeTraits {
        use ErrorSeverity::*;

        let (numeric, status, severity, retryable) = match self {
            Self::DatabaseError => (2000, StatusCode::INTERNAL_SERVER_ERROR, High, false),
            Self::DatabaseConnectionFailed => (2001, StatusCode::SERVICE_UNAVAILABLE, Critical, true),
            Self::DatabaseQueryFailed => (2002, StatusCode::INTERNAL_SERVER_ERROR, High, true),
            Self::RecordNotFound => (2004, StatusCode::NOT_FOUND, Low, false),
            Self::DuplicateRecord => (2005, StatusCode::CONFLICT, Low, false),

            Self::CacheError => (2100, StatusCode::INTERNAL_SERVER_ERROR, Medium, true),
            Self::CacheConnectionFailed => (2101, StatusCode::SERVICE_UNAVAILABLE, Critical, true),

            Self::SerializationError => (2200, StatusCode::INTERNAL_SERVER_ERROR, High, false),
            Self::DeserializationError => (2201, StatusCode::INTERNAL_SERVER_ERROR, High, false),

            Self::DependencyUnavailable => (3000, StatusCode::SERVICE_UNAVAILABLE, Medium, true),

            Self::Unauthorized => (4000, StatusCode::UNAUTHORIZED, Low, false),
            Self::Forbidden => (4001, StatusCode::FORBIDDEN, Low, false),
            Self::InvalidToken => (4002, StatusCode::UNAUTHORIZED, Low, false),
            Self::TokenExpired => (4003, StatusCode::UNAUTHORIZED, Low, false),
            Self::UnknownOperation => (4004, StatusCode::FORBIDDEN, Low, false),

            Self::ValidationError => (4100, StatusCode::UNPROCESSABLE_ENTITY, Low, false),

            Self::ConfigurationError => (5000, StatusCode::INTERNAL_SERVER_ERROR, High, false),
            Self::MissingConfiguration => (5001, StatusCode::INTERNAL_SERVER_ERROR, High, false),
            Self::InvalidConfiguration => (5002, StatusCode::INTERNAL_SERVER_ERROR, High, false),

            Self::InternalError => (9000, StatusCode::INTERNAL_SERVER_ERROR, Critical, false),
        };

        CodeTraits {
            numeric,
            status,
            severity,
            retryable,
        }
    }

    pub const fn numeric_code(&self) -> u32 {
        self.traits().numeric
    }

    pub const fn http_status(&self) -> StatusCode {
        self.traits().status
    }

    /// Whether the same request may succeed later without changes.
    pub const fn is_retryable(&self) -> bool {
        self.traits().retryable
    }

    pub const fn severity(&self) -> ErrorSeverity {
        self.traits().severity
    }

    /// Coarse grouping used as a metrics label.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            2000..=2099 => "database",
            2100..=2199 => "cache",
            2200..=2299 => "serialization",
            3000..=3099 => "dependency",
            4000..=4099 => "authentication",
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

/// Drives the log level an error is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller mistakes and denials
    Low,
    /// Degraded dependencies
    Medium,
    High,
    Critical,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured data returned with an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Also sent as the `Retry-After` header for retryable errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
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

    /// Values that fail to serialize are dropped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none() && self.retry_after_secs.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AgoraError
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub struct AgoraError {
    code: ErrorCode,
    user_message: Cow<'static, str>,
    internal_message: Option<String>,
    details: ErrorDetails,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for AgoraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl AgoraError {
    /// Every constructed error is counted in `agora_errors_total`.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        counter!(
            "agora_errors_total",
            "code" => code.to_string(),
            "category" => code.category(),
        )
        .increment(1);

        Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        }
    }

    /// `internal_message` is logged, never returned to the client.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(entity_type, entity_id))
    }

    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.details = self.details.with_context(key, value);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    fn log(&self) {
        let code = self.code.to_string();
        let status = self.http_status().as_u16();
        let internal = self.internal_message.as_deref().unwrap_or("");

        match self.code.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => tracing::error!(
                error_code = %code,
                http_status = status,
                user_message = %self.user_message,
                internal_message = internal,
                source = ?self.source,
                "Request failed"
            ),
            ErrorSeverity::Medium => tracing::warn!(
                error_code = %code,
                http_status = status,
                user_message = %self.user_message,
                internal_message = internal,
                "Request failed on a degraded dependency"
            ),
            ErrorSeverity::Low => tracing::debug!(
                error_code = %code,
                http_status = status,
                user_message = %self.user_message,
                "Request rejected"
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Response Envelope
// ═══════════════════════════════════════════════════════════════════════════════

/// `{ "success": false, "error": { ... } }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&AgoraError> for ErrorResponse {
    fn from(error: &AgoraError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: (!error.details.is_empty()).then(|| error.details.clone()),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for AgoraError {
    fn into_response(self) -> Response {
        self.log();

        let retry_after = self
            .details
            .retry_after_secs
            .filter(|_| self.code.is_retryable());
        let mut response = (self.http_status(), Json(ErrorResponse::from(&self))).into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Foreign errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Tags a foreign error with a code and a client-safe message. The foreign
/// error's text is kept as the internal message and as the source.
pub trait ErrorContext<T> {
    fn error_code(self, code: ErrorCode, user_message: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn error_code(self, code: ErrorCode, user_message: &'static str) -> Result<T> {
        self.map_err(|e| AgoraError::with_internal(code, user_message, e.to_string()).with_source(e))
    }
}

impl From<sqlx::Error> for AgoraError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (ErrorCode::RecordNotFound, "Record not found"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                (ErrorCode::DuplicateRecord, "Record already exists")
            }
            sqlx::Error::Database(_) => (ErrorCode::DatabaseQueryFailed, "A database error occurred"),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<redis::RedisError> for AgoraError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::CacheConnectionFailed, "Unable to connect to cache")
        } else if error.is_timeout() {
            (ErrorCode::CacheError, "Cache operation timed out")
        } else {
            (ErrorCode::CacheError, "A cache error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for AgoraError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for AgoraError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => {
                (ErrorCode::MissingConfiguration, "Required configuration not found")
            }
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => {
                (ErrorCode::InvalidConfiguration, "Configuration file is invalid")
            }
            _ => (ErrorCode::ConfigurationError, "Configuration error"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

impl From<GuardError> for AgoraError {
    fn from(error: GuardError) -> Self {
        match &error {
            GuardError::InvalidAuthentication => {
                Self::new(ErrorCode::Unauthorized, "invalid authentication")
            }
            GuardError::InsufficientPermissions { required, actual } => {
                Self::new(ErrorCode::Forbidden, "insufficient permissions")
                    .with_context("required_level", required.value())
                    .with_context("role_level", actual.value())
            }
            GuardError::UnknownOperation(operation) => {
                Self::new(ErrorCode::UnknownOperation, "operation is not registered")
                    .with_details(ErrorDetails::new().with_entity("operation", operation))
            }
            GuardError::DependencyUnavailable { dependency, .. } => Self::with_internal(
                ErrorCode::DependencyUnavailable,
                "authorization is temporarily unavailable",
                error.to_string(),
            )
            .with_details(
                ErrorDetails::new()
                    .with_context("dependency", dependency.as_str())
                    .with_retry_after(1),
            ),
        }
    }
}

impl From<AuthError> for AgoraError {
    fn from(error: AuthError) -> Self {
        let (code, user_msg) = match &error {
            AuthError::MissingCredentials => {
                (ErrorCode::Unauthorized, "Authentication credentials are required")
            }
            AuthError::InvalidToken => (ErrorCode::InvalidToken, "The provided token is invalid"),
            AuthError::TokenExpired => {
                (ErrorCode::TokenExpired, "The authentication token has expired")
            }
            AuthError::Internal(_) => (ErrorCode::InternalError, "An authentication error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{Dependency, RoleLevel};

    #[test]
    fn test_code_table() {
        assert_eq!(ErrorCode::RecordNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Forbidden.numeric_code(), 4001);
        assert_eq!(
            ErrorCode::DependencyUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorCode::CacheConnectionFailed.category(), "cache");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
        assert_eq!(ErrorCode::Forbidden.severity(), ErrorSeverity::Low);
        assert_eq!(ErrorCode::DependencyUnavailable.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::DependencyUnavailable.is_retryable());
        assert!(ErrorCode::CacheConnectionFailed.is_retryable());
        assert!(!ErrorCode::Forbidden.is_retryable());
        assert!(!ErrorCode::Unauthorized.is_retryable());
    }

    #[test]
    fn test_guard_errors_map_to_auth_codes() {
        let error = AgoraError::from(GuardError::InvalidAuthentication);
        assert_eq!(error.code(), ErrorCode::Unauthorized);
        assert_eq!(error.user_message(), "invalid authentication");

        let error = AgoraError::from(GuardError::InsufficientPermissions {
            required: RoleLevel::new(1),
            actual: RoleLevel::new(5),
        });
        assert_eq!(error.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(error.user_message(), "insufficient permissions");
        assert_eq!(error.details().context["role_level"], serde_json::json!(5));
    }

    #[test]
    fn test_dependency_error_sets_retry_after() {
        let error = AgoraError::from(GuardError::DependencyUnavailable {
            dependency: Dependency::Cache,
            source: Box::new(AgoraError::new(ErrorCode::CacheConnectionFailed, "down")),
        });
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn test_denial_has_no_retry_after() {
        let response = AgoraError::forbidden("no").into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_error_code_keeps_foreign_message_internal() {
        let failed: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connect to 10.0.0.7:6379 refused",
        ));
        let error = failed
            .error_code(ErrorCode::CacheConnectionFailed, "Failed to connect to Redis")
            .unwrap_err();

        assert_eq!(error.code(), ErrorCode::CacheConnectionFailed);
        let body = serde_json::to_string(&ErrorResponse::from(&error)).unwrap();
        assert!(body.contains("Failed to connect to Redis"));
        assert!(!body.contains("10.0.0.7"));
        assert!(error.to_string().contains("10.0.0.7"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = AgoraError::validation("role_level must be positive");
        let json = serde_json::to_string(&ErrorResponse::from(&error)).unwrap();

        assert!(json.contains("VALIDATION_ERROR"));
        assert!(json.contains("4100"));
        assert!(json.contains("role_level must be positive"));
        assert!(!json.contains("details"));
    }

    #[test]
    fn test_not_found_carries_entity() {
        let error = AgoraError::not_found("session", "abc");
        assert_eq!(error.details().entity_type.as_deref(), Some("session"));
        assert_eq!(error.user_message(), "session not found: abc");
    }
}
