//! Async transport running on the caller's tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Client;

use super::{send, Transport, TransportConfig, TransportRequest};
use crate::error::TransportError;

/// reqwest-backed transport. Holds no shared resources.
#[derive(Debug)]
pub struct HttpTransport {
    inner: Client,
    config: TransportConfig,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Build a transport with its own reqwest client.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        Ok(Self {
            inner: config.build_client()?,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Timeout and body limits in effect.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &TransportRequest) -> Result<String, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        send(&self.inner, request, self.config.max_body_size).await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Method;

    #[tokio::test]
    async fn test_closed_transport_rejects_requests() {
        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        transport.close();
        transport.close();

        let request = TransportRequest::new(Method::GET, "http://127.0.0.1:9/");
        let result = transport.execute(&request).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
