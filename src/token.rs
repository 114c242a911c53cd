//! IMDSv2 session token issuance.
//!
//! A token is requested before every data fetch and never reused. A `400`
//! from the token endpoint is fatal: the fetch must not fall back to the
//! token-less path. Any other issuance failure just means "no token".

use tracing::{debug, warn};

use crate::error::{MetadataError, TransportError};
use crate::transport::{BlockingTransport, Method, Transport, TransportRequest};

/// AWS IMDSv2 token endpoint path.
pub const TOKEN_PATH: &str = "/latest/api/token";

/// Token TTL header name.
pub const TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";

/// Token header name for requests.
pub const TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";

/// Requested token lifetime.
pub const DEFAULT_TOKEN_TTL_SECONDS: u32 = 21600;

pub(crate) fn token_request(endpoint: &str, ttl_seconds: u32) -> TransportRequest {
    TransportRequest::new(Method::PUT, format!("{endpoint}{TOKEN_PATH}"))
        .header(TOKEN_TTL_HEADER, ttl_seconds.to_string())
}

/// Interpret the outcome of a token request.
pub(crate) fn classify(outcome: Result<String, TransportError>) -> Result<Option<String>, MetadataError> {
    match outcome {
        Ok(token) => Ok(Some(token)),
        Err(TransportError::Status(400)) => {
            warn!("metadata token request rejected");
            Err(MetadataError::TokenRejected(TransportError::Status(400)))
        }
        Err(e) if e.is_fatal() => Err(MetadataError::Transport(e)),
        Err(e) => {
            debug!(error = %e, "metadata token unavailable, continuing without it");
            Ok(None)
        }
    }
}

/// Request a token over an async transport.
pub async fn acquire<T>(transport: &T, endpoint: &str, ttl_seconds: u32) -> Result<Option<String>, MetadataError>
where
    T: Transport + ?Sized,
{
    let request = token_request(endpoint, ttl_seconds);
    classify(transport.execute(&request).await)
}

/// Request a token over a blocking transport.
pub fn acquire_blocking<T>(transport: &T, endpoint: &str, ttl_seconds: u32) -> Result<Option<String>, MetadataError>
where
    T: BlockingTransport + ?Sized,
{
    let request = token_request(endpoint, ttl_seconds);
    classify(transport.execute(&request))
}
