//! Reference-counted handles to shared transport resources.
//!
//! A resource (for example a reactor thread pool) is shared by every client
//! that acquired it. Each owning handle holds one counted reference; the last
//! owner to close tears the resource down and fires the completion signal.
//! A borrowed handle points at the same resource without holding a reference,
//! so closing it never tears anything down.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;
use tracing::debug;

use crate::error::MetadataError;

/// A resource that must be shut down explicitly once nobody uses it.
pub trait Teardown: Send + Sync + 'static {
    /// Release everything the resource holds. Called exactly once.
    fn teardown(&self);
}

/// How a handle relates to the resource it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The handle holds a counted reference and releases it on close.
    Owned,
    /// The handle was lent by another owner and never releases.
    Borrowed,
}

struct Shared<R> {
    resource: R,
    refs: AtomicUsize,
    done: watch::Sender<bool>,
}

impl<R: Teardown> Shared<R> {
    fn new(resource: R) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            resource,
            refs: AtomicUsize::new(1),
            done,
        })
    }

    /// Take another reference, unless the resource is already gone.
    fn retain(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 {
                    None
                } else {
                    n.checked_add(1)
                }
            })
            .is_ok()
    }

    fn release(&self) {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        // Only the 1 -> 0 transition tears down; a zero count never moves again.
        if previous == Ok(1) {
            debug!("last reference released, tearing down shared resource");
            self.resource.teardown();
            self.done.send_replace(true);
        }
    }

    fn is_torn_down(&self) -> bool {
        self.refs.load(Ordering::Acquire) == 0
    }
}

/// Signal that fires once the shared resource has been torn down.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<bool>,
}

impl Completion {
    /// Whether teardown has completed.
    pub fn is_complete(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until teardown has completed. Returns immediately if it already has.
    pub async fn wait(mut self) {
        // The sender outlives every handle that could still trigger teardown,
        // so a closed channel means there is nothing left to wait for.
        let _ = self.rx.wait_for(|done| *done).await;
    }
}

/// Handle to a shared resource.
pub struct ResourceHandle<R: Teardown> {
    shared: Arc<Shared<R>>,
    ownership: Ownership,
    closed: AtomicBool,
}

impl<R: Teardown> ResourceHandle<R> {
    /// Wrap a freshly created resource. The returned handle is its only owner.
    pub fn create(resource: R) -> Self {
        Self::owned(Shared::new(resource))
    }

    fn owned(shared: Arc<Shared<R>>) -> Self {
        Self {
            shared,
            ownership: Ownership::Owned,
            closed: AtomicBool::new(false),
        }
    }

    /// Lend the resource to another holder without adding a reference.
    pub fn lend(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            ownership: Ownership::Borrowed,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether this handle owns a reference or borrows one.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Access the resource.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::ResourceClosed` if this handle was closed or
    /// the resource has been torn down.
    pub fn get(&self) -> Result<&R, MetadataError> {
        if self.is_closed() {
            return Err(MetadataError::ResourceClosed);
        }
        Ok(&self.shared.resource)
    }

    /// Number of owning references currently held on the resource.
    pub fn ref_count(&self) -> usize {
        self.shared.refs.load(Ordering::Acquire)
    }

    /// Whether this handle can no longer reach the resource.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shared.is_torn_down()
    }

    /// Signal observing teardown of the underlying resource.
    pub fn completion(&self) -> Completion {
        Completion {
            rx: self.shared.done.subscribe(),
        }
    }

    /// Close this handle. Owned handles release their reference; calling
    /// `close` again is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.ownership == Ownership::Owned {
            self.shared.release();
        }
    }
}

impl<R: Teardown> Drop for ResourceHandle<R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<R: Teardown> fmt::Debug for ResourceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("ownership", &self.ownership)
            .field("refs", &self.ref_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

type Factory<R> = Box<dyn Fn() -> Result<R, MetadataError> + Send + Sync>;

/// Hands out owning handles to one lazily created shared resource.
///
/// While any owner is alive, `acquire` attaches to the existing resource.
/// Once the last owner has closed, the next `acquire` creates a new one.
pub struct ResourceManager<R: Teardown> {
    factory: Factory<R>,
    current: Mutex<Weak<Shared<R>>>,
}

impl<R: Teardown> ResourceManager<R> {
    /// Create a manager that builds resources with `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<R, MetadataError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            current: Mutex::new(Weak::new()),
        }
    }

    /// Attach to the live shared resource, or create one.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error when a new resource has to be built.
    pub fn acquire(&self) -> Result<ResourceHandle<R>, MetadataError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(shared) = current.upgrade() {
            if shared.retain() {
                debug!(refs = shared.refs.load(Ordering::Relaxed), "attached to shared resource");
                return Ok(ResourceHandle::owned(shared));
            }
        }

        let shared = Shared::new((self.factory)()?);
        *current = Arc::downgrade(&shared);
        debug!("created shared resource");
        Ok(ResourceHandle::owned(shared))
    }
}

impl<R: Teardown> fmt::Debug for ResourceManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager").finish_non_exhaustive()
    }
}
