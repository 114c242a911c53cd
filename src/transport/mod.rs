//! HTTP transport contract used by the metadata clients.
//!
//! A transport executes one request and returns the response body. Backends
//! report "could not complete" failures (connect, timeout) separately from
//! "reached and rejected" ones (`TransportError::Status`), and leave the
//! meaning of a status code to the caller.

mod http;
mod pooled;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::debug;

use crate::error::TransportError;

pub use http::HttpTransport;
pub use pooled::{PendingResponse, PooledTransport};
pub use reqwest::Method;

/// Default timeout for metadata requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// One outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the first header named `name`, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Settings shared by the reqwest-backed transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub max_body_size: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_body_size: None,
        }
    }
}

impl TransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_body_size(mut self, max_size: usize) -> Self {
        self.max_body_size = Some(max_size);
        self
    }

    pub(crate) fn build_client(&self) -> Result<Client, TransportError> {
        Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(false)
            .build()
            .map_err(TransportError::from)
    }
}

/// Transport that blocks the calling thread until the response arrives.
pub trait BlockingTransport: Send + Sync {
    /// Execute `request` and return the response body.
    fn execute(&self, request: &TransportRequest) -> Result<String, TransportError>;

    /// Release whatever the transport acquired. Idempotent.
    fn close(&self);
}

/// Transport whose requests complete asynchronously.
///
/// Dropping the returned future before it resolves cancels the request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute `request` and return the response body.
    async fn execute(&self, request: &TransportRequest) -> Result<String, TransportError>;

    /// Release whatever the transport acquired. Idempotent.
    fn close(&self);
}

/// Send `request` with `client` and read the body as UTF-8.
pub(crate) async fn send(
    client: &Client,
    request: &TransportRequest,
    max_size: Option<usize>,
) -> Result<String, TransportError> {
    let mut builder = client.request(request.method.clone(), &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    debug!(method = %request.method, url = %request.url, "sending request");
    let response = builder.send().await?;

    let status = response.status();
    debug!(status = %status, "response received");
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }

    let body = read_body_limited(response, max_size).await?;
    String::from_utf8(body).map_err(|_| TransportError::Utf8)
}

/// Read response body with an optional size limit.
///
/// With a limit, an oversized `Content-Length` is rejected before reading,
/// and the streamed body is abandoned as soon as it crosses the limit.
pub(crate) async fn read_body_limited(
    response: Response,
    max_size: Option<usize>,
) -> Result<Vec<u8>, TransportError> {
    let Some(max_size) = max_size else {
        return Ok(response.bytes().await?.to_vec());
    };

    if let Some(content_length) = response.content_length() {
        if content_length as usize > max_size {
            return Err(TransportError::TooLarge(content_length as usize, max_size));
        }
    }

    let capacity = response
        .content_length()
        .map(|cl| (cl as usize).min(max_size))
        .unwrap_or(max_size.min(8192));
    let mut body = Vec::with_capacity(capacity);

    let mut stream = response;
    while let Some(chunk) = stream.chunk().await? {
        let total = body.len().saturating_add(chunk.len());
        if total > max_size {
            return Err(TransportError::TooLarge(total, max_size));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(1));
        assert_eq!(TransportConfig::default().max_body_size, None);
    }

    #[test]
    fn test_request_headers() {
        let request = TransportRequest::new(Method::GET, "http://localhost/x")
            .header("Accept", "*/*")
            .header("x-aws-ec2-metadata-token", "abc");

        assert_eq!(request.header_value("accept"), Some("*/*"));
        assert_eq!(request.header_value("X-AWS-EC2-METADATA-TOKEN"), Some("abc"));
        assert_eq!(request.header_value("missing"), None);
    }

    #[test]
    fn test_config_builders() {
        let config = TransportConfig::default()
            .with_timeout(Duration::from_millis(200))
            .with_max_body_size(16);
        assert_eq!(config.timeout, Duration::from_millis(200));
        assert_eq!(config.max_body_size, Some(16));
    }
}
