//! Reactor thread pool shared between pooled transports.

use std::sync::{Mutex, OnceLock, PoisonError};

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::error::MetadataError;
use crate::resource::{ResourceManager, Teardown};

/// Worker threads in the process-wide default pool.
pub const DEFAULT_REACTOR_THREADS: usize = 2;

/// A multi-threaded reactor that drives transport I/O.
#[derive(Debug)]
pub struct ReactorPool {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    threads: usize,
}

impl ReactorPool {
    /// Start a pool with `threads` worker threads (at least one).
    pub fn new(threads: usize) -> Result<Self, MetadataError> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("metadata-reactor")
            .enable_all()
            .build()
            .map_err(|e| MetadataError::Config(format!("failed to start reactor pool: {e}")))?;

        debug!(threads, "started reactor pool");
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            threads,
        })
    }

    /// Handle used to spawn onto or block on the pool.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Whether the pool is still running.
    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Teardown for ReactorPool {
    fn teardown(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            debug!(threads = self.threads, "shutting down reactor pool");
            // Teardown may run inside an async context; must not block.
            runtime.shutdown_background();
        }
    }
}

impl Drop for ReactorPool {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Process-wide manager for the default reactor pool.
pub fn default_manager() -> &'static ResourceManager<ReactorPool> {
    static MANAGER: OnceLock<ResourceManager<ReactorPool>> = OnceLock::new();
    MANAGER.get_or_init(|| ResourceManager::new(|| ReactorPool::new(DEFAULT_REACTOR_THREADS)))
}
