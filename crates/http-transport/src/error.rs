//! Error types for the HTTP transport.

use marksync_core::transport::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HttpTransportError>;

/// Whether a failed send may be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
}

#[derive(Debug, Error)]
pub enum HttpTransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A response arrived but its body could not be read.
    #[error("Unreadable response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpTransportError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Only a connection that was never established is retried. A timeout
    /// may fire after the backend applied the write, so it is permanent.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http(err) if err.is_connect() => RetryClass::Retryable,
            _ => RetryClass::Permanent,
        }
    }
}

impl From<HttpTransportError> for TransportError {
    fn from(err: HttpTransportError) -> Self {
        match err {
            HttpTransportError::Http(err) if err.is_timeout() => TransportError::Timeout,
            HttpTransportError::Http(err) => TransportError::Network(err.to_string()),
            HttpTransportError::InvalidResponse(message) => TransportError::Network(message),
            HttpTransportError::Json(err) => TransportError::InvalidRequest(err.to_string()),
            HttpTransportError::InvalidRequest(message) => TransportError::InvalidRequest(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_requests_are_permanent() {
        let err = HttpTransportError::invalid_request("bad header");
        assert_eq!(err.retry_class(), RetryClass::Permanent);
        assert!(matches!(
            TransportError::from(err),
            TransportError::InvalidRequest(_)
        ));
    }
}
