//! Typed error hierarchy for the AgentBoard sync client.
//!
//! Two top-level enums cover the two failure surfaces:
//! - `ApiError`: a REST request failed (server-reported, network, or decode)
//! - `SyncError`: session, configuration, and local storage failures
//!
//! The connection manager has no error type. Transport failures
//! are absorbed into its reconnect loop and never reach callers.

use agentboard_common::{ApiErrorBody, FieldError};
use thiserror::Error;

/// Error codes the server puts in the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Validation,
    NotFound,
    Duplicate,
    PermissionDenied,
    LimitExceeded,
    InvalidOperation,
    AuthFailed,
    Unauthorized,
    RateLimit,
    Internal,
    Unknown,
}

/// How the UI layer should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Per-field messages shown next to form fields.
    Validation,
    /// Domain refusal shown as a toast.
    Domain,
    /// Session is no longer valid; the auth layer tears it down.
    Authentication,
    /// Transient toast, no automatic retry.
    RateLimited,
    /// Server unreachable.
    Network,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Duplicate => "DUPLICATE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::LimitExceeded => "LIMIT_EXCEEDED",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::AuthFailed => "AUTH_FAILED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimit => "RATE_LIMIT",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Unrecognized codes map to `Unknown`.
    pub fn parse(code: &str) -> Self {
        match code {
            "VALIDATION_ERROR" => Self::Validation,
            "NOT_FOUND" => Self::NotFound,
            "DUPLICATE" => Self::Duplicate,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "LIMIT_EXCEEDED" => Self::LimitExceeded,
            "INVALID_OPERATION" => Self::InvalidOperation,
            "AUTH_FAILED" => Self::AuthFailed,
            "UNAUTHORIZED" => Self::Unauthorized,
            "RATE_LIMIT" => Self::RateLimit,
            "INTERNAL_ERROR" => Self::Internal,
            _ => Self::Unknown,
        }
    }

    /// Human message used when the server sent none.
    pub fn fallback_message(&self) -> &'static str {
        match self {
            Self::Validation => "Please check your input and try again",
            Self::NotFound => "The requested resource was not found",
            Self::Duplicate => "This resource already exists",
            Self::PermissionDenied => "You don't have permission to perform this action",
            Self::LimitExceeded => "Limit reached",
            Self::InvalidOperation => "This operation is not allowed",
            Self::AuthFailed => "Authentication failed",
            Self::Unauthorized => "Please sign in to continue",
            Self::RateLimit => "Too many requests. Please wait a moment.",
            Self::Internal => "An unexpected error occurred. Please try again.",
            Self::Unknown => GENERIC_MESSAGE,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation => ErrorCategory::Validation,
            Self::NotFound
            | Self::Duplicate
            | Self::PermissionDenied
            | Self::LimitExceeded
            | Self::InvalidOperation => ErrorCategory::Domain,
            Self::AuthFailed | Self::Unauthorized => ErrorCategory::Authentication,
            Self::RateLimit => ErrorCategory::RateLimited,
            Self::Internal | Self::Unknown => ErrorCategory::Internal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const GENERIC_MESSAGE: &str = "Something went wrong";
pub const NETWORK_MESSAGE: &str = "Unable to connect to server. Check your internet connection.";

/// Errors from a REST request.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{code}: {message}")]
    Api {
        code: ErrorCode,
        message: String,
        details: Option<Vec<FieldError>>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Build from a parsed error envelope, filling in the code's fallback
    /// message when the server left it empty.
    pub fn from_body(body: ApiErrorBody) -> Self {
        let code = ErrorCode::parse(&body.code);
        let message = if body.message.is_empty() {
            code.fallback_message().to_string()
        } else {
            body.message
        };
        Self::Api {
            code,
            message,
            details: body.details,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Api { code, .. } => *code,
            Self::Network(_) | Self::Decode(_) => ErrorCode::Unknown,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api { code, .. } => code.category(),
            Self::Network(_) => ErrorCategory::Network,
            Self::Decode(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Api { details: Some(d), .. } => d,
            _ => &[],
        }
    }

    /// Message suitable for a toast: never a raw code when a friendlier
    /// text exists.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => NETWORK_MESSAGE.to_string(),
            Self::Api { message, .. } if !message.is_empty() => message.clone(),
            Self::Api { code, .. } => code.fallback_message().to_string(),
            Self::Decode(_) => GENERIC_MESSAGE.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Network(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Errors from the session, configuration, and storage layers.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    StorageRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    StorageWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No active board session")]
    NoSession,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
