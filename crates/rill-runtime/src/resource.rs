use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rill_base::{ExitCase, StreamError, Token};

use crate::outcome::Value;

/// Release action attached to an acquired resource.
pub type Finalizer = Box<dyn FnOnce(ExitCase) -> BoxFuture<'static, Result<(), StreamError>> + Send>;

pub(crate) type AcquireFn =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<(Value, Finalizer), StreamError>> + Send>;

/// Pairs a typed acquire/release with the erased form the interpreter runs.
/// The release action gets its own clone of the acquired value.
pub(crate) fn erase_acquire<R, A, AF, Rel, RF>(acquire: A, release: Rel) -> AcquireFn
where
    R: Clone + Send + 'static,
    A: FnOnce() -> AF + Send + 'static,
    AF: Future<Output = Result<R, StreamError>> + Send + 'static,
    Rel: FnOnce(R, ExitCase) -> RF + Send + 'static,
    RF: Future<Output = Result<(), StreamError>> + Send + 'static,
{
    Box::new(move || {
        Box::pin(async move {
            let resource = acquire().await?;
            let handle = resource.clone();
            let finalizer: Finalizer = Box::new(move |exit| Box::pin(release(handle, exit)));
            Ok((Box::new(resource) as Value, finalizer))
        })
    })
}

struct State {
    open: bool,
    finalizer: Option<Finalizer>,
    leases: usize,
}

impl State {
    fn is_finished(&self) -> bool {
        !self.open && self.leases == 0
    }
}

/// One acquired resource and its finalizer.
///
/// The finalizer runs at most once, and only after the resource has been
/// released and every outstanding lease has been cancelled.
pub struct ScopedResource {
    id: Token,
    state: Mutex<State>,
}

impl ScopedResource {
    pub fn new() -> Self {
        ScopedResource {
            id: Token::new(),
            state: Mutex::new(State {
                open: true,
                finalizer: None,
                leases: 0,
            }),
        }
    }

    pub fn id(&self) -> Token {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn leases(&self) -> usize {
        self.state.lock().leases
    }

    /// Attaches `finalizer` once acquisition finished.
    ///
    /// Returns `Ok(false)` when the resource was not retained: the caller was
    /// already cancelled or the resource got released while acquiring. The
    /// finalizer has run in that case.
    pub async fn acquired(&self, finalizer: Finalizer, cancelled: bool) -> Result<bool, StreamError> {
        let finalizer = {
            let mut state = self.state.lock();
            if cancelled {
                state.open = false;
            }
            if !state.is_finished() {
                // Outstanding leases keep the finalizer parked even when cancelled.
                state.finalizer = Some(finalizer);
                return Ok(!cancelled);
            }
            finalizer
        };
        let exit = if cancelled {
            ExitCase::Cancelled
        } else {
            ExitCase::Completed
        };
        tracing::trace!(resource = %self.id, "finalizing resource right after acquisition");
        finalizer(exit).await.map(|()| false)
    }

    /// Marks the resource closed and runs the finalizer unless leases are outstanding.
    pub async fn release(&self, exit: ExitCase) -> Result<(), StreamError> {
        let finalizer = {
            let mut state = self.state.lock();
            state.open = false;
            if state.leases == 0 {
                state.finalizer.take()
            } else {
                None
            }
        };
        match finalizer {
            Some(finalizer) => {
                tracing::trace!(resource = %self.id, ?exit, "releasing resource");
                finalizer(exit).await
            }
            None => Ok(()),
        }
    }

    /// Extends the lifetime of the resource until the lease is cancelled.
    pub fn lease(self: &Arc<Self>) -> Option<ResourceLease> {
        let mut state = self.state.lock();
        if !state.open {
            return None;
        }
        state.leases += 1;
        Some(ResourceLease {
            resource: Arc::clone(self),
        })
    }

    fn cancel_lease(&self) -> Option<Finalizer> {
        let mut state = self.state.lock();
        state.leases = state.leases.saturating_sub(1);
        if state.is_finished() {
            state.finalizer.take()
        } else {
            None
        }
    }
}

impl Default for ScopedResource {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding lease on one resource. Cancelling consumes it, so a lease is
/// cancelled at most once.
#[must_use = "a lease must be cancelled for the finalizer to run"]
pub struct ResourceLease {
    resource: Arc<ScopedResource>,
}

impl ResourceLease {
    pub async fn cancel(self) -> Result<(), StreamError> {
        match self.resource.cancel_lease() {
            Some(finalizer) => {
                tracing::trace!(resource = %self.resource.id, "last lease cancelled");
                finalizer(ExitCase::Completed).await
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests;
