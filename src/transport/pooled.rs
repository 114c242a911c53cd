//! Transport driven by a shared reactor pool.
//!
//! Every request is spawned onto the pool. Blocking callers park on the
//! resulting [`PendingResponse`]; async callers await it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{send, BlockingTransport, Transport, TransportConfig, TransportRequest};
use crate::error::{MetadataError, TransportError};
use crate::reactor::{self, ReactorPool};
use crate::resource::{Completion, Ownership, ResourceHandle, ResourceManager};

/// Transport whose I/O runs on a [`ReactorPool`].
#[derive(Debug)]
pub struct PooledTransport {
    inner: Client,
    config: TransportConfig,
    reactor: ResourceHandle<ReactorPool>,
}

impl PooledTransport {
    /// Attach to the process-wide default reactor pool.
    pub fn new(config: TransportConfig) -> Result<Self, MetadataError> {
        Self::with_manager(reactor::default_manager(), config)
    }

    /// Attach to the pool handed out by `manager`. The transport owns one
    /// reference and releases it on close.
    pub fn with_manager(
        manager: &ResourceManager<ReactorPool>,
        config: TransportConfig,
    ) -> Result<Self, MetadataError> {
        let reactor = manager.acquire()?;
        Ok(Self {
            inner: config.build_client()?,
            config,
            reactor,
        })
    }

    /// Run on a caller-supplied pool. Closing the transport leaves the pool
    /// running; the caller stays responsible for closing `reactor`.
    pub fn with_reactor(
        reactor: &ResourceHandle<ReactorPool>,
        config: TransportConfig,
    ) -> Result<Self, MetadataError> {
        Ok(Self {
            inner: config.build_client()?,
            config,
            reactor: reactor.lend(),
        })
    }

    /// Whether closing this transport releases a reference on the pool.
    pub fn ownership(&self) -> Ownership {
        self.reactor.ownership()
    }

    /// Whether this transport can no longer reach its pool.
    pub fn is_closed(&self) -> bool {
        self.reactor.is_closed()
    }

    fn pool_handle(&self) -> Result<&Handle, TransportError> {
        self.reactor
            .get()
            .map(ReactorPool::handle)
            .map_err(|_| TransportError::Closed)
    }

    /// Spawn `request` onto the pool.
    ///
    /// Dropping the returned [`PendingResponse`] cancels the request. If the
    /// pool is torn down while the request is in flight, it resolves to
    /// `TransportError::Closed`.
    pub fn submit(&self, request: TransportRequest) -> Result<PendingResponse, TransportError> {
        let handle = self.pool_handle()?;
        let client = self.inner.clone();
        let max_size = self.config.max_body_size;
        let task = handle.spawn(async move { send(&client, &request, max_size).await });
        Ok(PendingResponse::new(task, self.reactor.completion()))
    }
}

impl BlockingTransport for PooledTransport {
    fn execute(&self, request: &TransportRequest) -> Result<String, TransportError> {
        let pending = self.submit(request.clone())?;
        // Only the join is driven here; the request itself runs on the pool's
        // workers and its timers, so teardown surfaces as `Closed`.
        self.pool_handle()?.block_on(pending)
    }

    fn close(&self) {
        self.reactor.close();
    }
}

#[async_trait]
impl Transport for PooledTransport {
    async fn execute(&self, request: &TransportRequest) -> Result<String, TransportError> {
        self.submit(request.clone())?.await
    }

    fn close(&self) {
        self.reactor.close();
    }
}

/// A request in flight on the reactor pool.
///
/// Dropping it before it resolves aborts the request.
#[derive(Debug)]
pub struct PendingResponse {
    task: JoinHandle<Result<String, TransportError>>,
    pool: Completion,
    cancelled: AtomicBool,
}

impl PendingResponse {
    fn new(task: JoinHandle<Result<String, TransportError>>, pool: Completion) -> Self {
        Self {
            task,
            pool,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Cancel the request. Awaiting it afterwards yields
    /// `TransportError::Cancelled` unless it had already completed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.task.abort();
    }

    /// Whether the request has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn join_error(&self, e: &tokio::task::JoinError) -> TransportError {
        if !e.is_cancelled() {
            return TransportError::Connect(format!("request task failed: {e}"));
        }
        // A task cancelled without `cancel` was dropped by pool teardown.
        if !self.cancelled.load(Ordering::Acquire) && self.pool.is_complete() {
            TransportError::Closed
        } else {
            TransportError::Cancelled
        }
    }
}

impl Future for PendingResponse {
    type Output = Result<String, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(self.join_error(&e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.task.abort();
    }
}
