//! Cooperative cancellation.
//!
//! A [`Canceler`] is handed down the call chain of an operation. Steps that
//! start cancellable work register a callback with [`Canceler::on_cancel`];
//! the returned [`CancelRegistration`] unregisters it again when dropped, so
//! finished steps do not accumulate callbacks. Cancellation never aborts a
//! request that is already on the wire: the caller checks the token after
//! awaiting and discards the result.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

type Callback = Box<dyn FnOnce() + Send>;

struct Inner {
    canceled: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    notify: Notify,
}

/// Cloneable cancellation token; all clones share one state.
#[derive(Clone)]
pub struct Canceler {
    inner: Arc<Inner>,
}

impl Default for Canceler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Canceler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceler")
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

impl Canceler {
    /// Creates a token that has not been canceled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Cancel the token.
    ///
    /// Registered callbacks run exactly once, on the calling thread. Further
    /// calls are no-ops.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for (_, callback) in callbacks {
            callback();
        }
        self.inner.notify.notify_waiters();
    }

    /// Returns true once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Returns `Err(Error::Canceled)` if the token was canceled.
    ///
    /// # Errors
    /// Returns [`Error::Canceled`] after cancellation.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Register a callback to run on cancellation.
    ///
    /// If the token is already canceled the callback runs immediately.
    #[must_use = "dropping the registration unregisters the callback"]
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) -> CancelRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.is_canceled() {
                callbacks.push((id, Box::new(callback)));
                return CancelRegistration {
                    inner: Arc::downgrade(&self.inner),
                    id,
                };
            }
        }
        callback();
        CancelRegistration {
            inner: Weak::new(),
            id,
        }
    }

    /// Resolves once the token is canceled.
    pub async fn canceled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }

    /// Await `fut` to completion, then discard its result if the token was
    /// canceled in the meantime.
    ///
    /// # Errors
    /// Returns [`Error::Canceled`] before starting or after finishing when the
    /// token is canceled, otherwise the future's own result.
    pub async fn finish<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let out = fut.await;
        self.check()?;
        out
    }
}

/// Handle for a callback registered with [`Canceler::on_cancel`].
#[derive(Debug)]
pub struct CancelRegistration {
    inner: Weak<Inner>,
    id: u64,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
