//! Error types for metadata and transport operations.

use thiserror::Error;

/// Failure of a single transport exchange.
///
/// `Status` means the endpoint was reached and answered with a non-success
/// code; callers decide what that code means. Everything else means the
/// exchange could not be completed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established or was dropped.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Request timed out.
    #[error("request timeout")]
    Timeout,

    /// HTTP error with status code.
    #[error("http {0}")]
    Status(u16),

    /// The pending request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// The transport, or the shared resource it runs on, is closed.
    #[error("transport is closed")]
    Closed,

    /// Response was not valid UTF-8.
    #[error("invalid utf-8")]
    Utf8,

    /// Response exceeds maximum allowed size.
    #[error("response too large: {0} bytes exceeds limit of {1} bytes")]
    TooLarge(usize, usize),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether this failure must abort the operation instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::InvalidRequest(_))
    }

    /// Whether the endpoint answered with `404 Not Found`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Status(404))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

/// Errors that can occur when fetching instance metadata.
///
/// Every variant is fatal. Non-fatal conditions (missing values, unparsable
/// documents, unavailable tokens) surface as `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Metadata usage is switched off.
    #[error("EC2 metadata usage is disabled")]
    Disabled,

    /// Every attempt failed.
    #[error("unable to contact EC2 metadata service after {attempts} attempts: {source}")]
    AttemptsExhausted {
        /// Attempt budget that was used up.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        source: TransportError,
    },

    /// No attempts were available.
    #[error("unable to contact EC2 metadata service")]
    Unreachable,

    /// The token endpoint refused to issue a token.
    #[error("unable to fetch metadata token: {0}")]
    TokenRejected(#[source] TransportError),

    /// Transport failure that cannot be retried.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A shared resource was used after teardown.
    #[error("shared resource is closed")]
    ResourceClosed,

    /// Configuration could not be read.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MetadataError::Disabled.to_string(),
            "EC2 metadata usage is disabled"
        );
        assert_eq!(
            MetadataError::Unreachable.to_string(),
            "unable to contact EC2 metadata service"
        );
        assert_eq!(
            MetadataError::AttemptsExhausted {
                attempts: 3,
                source: TransportError::Timeout,
            }
            .to_string(),
            "unable to contact EC2 metadata service after 3 attempts: request timeout"
        );
        assert_eq!(
            MetadataError::TokenRejected(TransportError::Status(400)).to_string(),
            "unable to fetch metadata token: http 400"
        );
        assert_eq!(TransportError::Status(404).to_string(), "http 404");
        assert_eq!(TransportError::Closed.to_string(), "transport is closed");
    }

    #[test]
    fn test_classification() {
        assert!(TransportError::Closed.is_fatal());
        assert!(!TransportError::Timeout.is_fatal());
        assert!(!TransportError::Status(500).is_fatal());
        assert!(TransportError::Status(404).is_not_found());
        assert!(!TransportError::Status(400).is_not_found());
    }

    #[test]
    fn test_attempts_exhausted_keeps_cause() {
        use std::error::Error as _;

        let err = MetadataError::AttemptsExhausted {
            attempts: 2,
            source: TransportError::Status(503),
        };
        let cause = err.source().map(ToString::to_string);
        assert_eq!(cause.as_deref(), Some("http 503"));
    }
}
