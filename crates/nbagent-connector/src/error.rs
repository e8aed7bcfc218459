//! Error types for source connectors.
//!
//! Errors are split into transient failures (network hiccups, timeouts,
//! rate limiting) that a later discovery cycle may recover from, and
//! permanent failures (bad credentials, invalid configuration) that
//! require operator intervention.

use thiserror::Error;

/// Errors that can occur while talking to a discovery source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Failed to establish a connection to the source.
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The source rejected our credentials.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The operation did not complete within the configured timeout.
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The source is throttling us.
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The source returned a response we could not parse.
    #[error("invalid response from source: {message}")]
    InvalidResponse { message: String },

    /// The source configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A capability was requested that this source does not support.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Underlying I/O failure (filesystem sources, socket probes).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for source-specific failures.
    #[error("source error: {message}")]
    Other { message: String },
}

impl SourceError {
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether retrying in a later cycle may succeed without operator action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::Io(_)
        )
    }

    /// Whether the failure requires a configuration or credential fix.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. }
                | Self::InvalidConfiguration { .. }
                | Self::Unsupported { .. }
        )
    }

    /// Stable machine-readable code for logs and reports.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::AuthenticationFailed { .. } => "AUTHENTICATION_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::InvalidResponse { .. } => "INVALID_RESPONSE",
            Self::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Other { .. } => "SOURCE_ERROR",
        }
    }
}

/// Result alias used throughout the connector framework.
pub type SourceResult<T> = Result<T, SourceError>;
