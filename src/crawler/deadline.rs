//! Deadline wrapper for collaborator calls
//!
//! Every discovery call, content handler and secondary step runs inside
//! `with_deadline`. The operation receives a `CancelHandle` on which it may
//! register hooks (closing a browser tab, aborting a request). When the
//! deadline elapses first, the hooks run once, the operation's future is
//! dropped and the caller sees `HarvestError::DeadlineExceeded`.

use crate::HarvestError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type CancelHook = Box<dyn FnOnce() + Send>;

/// Lets a deadline-bound operation learn about and react to cancellation
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    hooks: Mutex<Vec<CancelHook>>,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook to run if the deadline elapses
    ///
    /// A hook registered after cancellation runs immediately.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cancelled() {
            hook();
            return;
        }

        let mut hooks = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        hooks.push(Box::new(hook));
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Marks the operation cancelled and runs pending hooks
    ///
    /// Only the first call runs hooks.
    fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let hooks: Vec<CancelHook> = {
            let mut hooks = self
                .inner
                .hooks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *hooks)
        };

        for hook in hooks {
            hook();
        }
    }
}

/// Runs `operation` with a deadline of `limit`
///
/// # Returns
///
/// * `Ok(T)` - The operation finished in time and succeeded
/// * `Err(HarvestError::DeadlineExceeded)` - The deadline elapsed first; cancel hooks have run
/// * `Err(_)` - The operation's own error, unchanged apart from conversion
pub async fn with_deadline<T, E, F, Fut>(limit: Duration, operation: F) -> crate::Result<T>
where
    F: FnOnce(CancelHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<HarvestError>,
{
    let cancel = CancelHandle::new();
    let future = operation(cancel.clone());

    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            cancel.cancel();
            Err(HarvestError::DeadlineExceeded { limit })
        }
    }
}
