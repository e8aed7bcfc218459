//! NetBox client error taxonomy.

use thiserror::Error;

/// Errors produced by the NetBox REST client.
#[derive(Error, Debug)]
pub enum NetBoxError {
    /// Transport-level failure (DNS, TCP, TLS, body read).
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// NetBox returned a non-success status with an error body.
    #[error("netbox api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// NetBox rejected the API token.
    #[error("netbox authentication failed: {message}")]
    Authentication { message: String },

    /// NetBox is throttling us.
    #[error("netbox rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// A response body did not match the expected shape.
    #[error("unexpected netbox response: {message}")]
    UnexpectedResponse { message: String },

    /// The configured base URL is not a valid URL.
    #[error("invalid netbox url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// All retry attempts were exhausted.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl NetBoxError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
        }
    }

    /// Whether retrying the request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }
}

/// Result alias for NetBox client operations.
pub type NetBoxResult<T> = Result<T, NetBoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(NetBoxError::api(502, "bad gateway").is_transient());
        assert!(NetBoxError::RateLimited {
            retry_after_secs: Some(1)
        }
        .is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        assert!(!NetBoxError::api(400, "bad request").is_transient());
        assert!(!NetBoxError::Authentication {
            message: "invalid token".into()
        }
        .is_transient());
    }
}
