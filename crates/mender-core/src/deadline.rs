//! The session deadline: the single cancellation authority of a session.
//!
//! A `Deadline` fires either when its instant passes or when `expire_now()`
//! is called (operator interrupt). Clones share the same state, so every
//! component holding a clone observes the same expiry.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use mender_contracts::error::{MenderError, MenderResult};

struct Inner {
    at: Instant,
    fired: AtomicBool,
    notify: Notify,
}

#[derive(Clone)]
pub struct Deadline {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("remaining", &self.remaining())
            .field("expired", &self.is_expired())
            .finish()
    }
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self::at(Instant::now() + budget)
    }

    pub fn at(at: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                at,
                fired: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst) || Instant::now() >= self.inner.at
    }

    /// Fire the deadline immediately.
    pub fn expire_now(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn remaining(&self) -> Duration {
        if self.inner.fired.load(Ordering::SeqCst) {
            return Duration::ZERO;
        }
        self.inner.at.saturating_duration_since(Instant::now())
    }

    /// Resolve once the deadline has fired.
    pub async fn expired(&self) {
        loop {
            // Registered before the check so an expire_now() between the
            // check and the select is not lost.
            let notified = self.inner.notify.notified();
            if self.is_expired() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(self.inner.at) => return,
                _ = notified => {}
            }
        }
    }

    /// Run `fut` unless the deadline fires first.
    ///
    /// Returns `MenderError::SessionTimeout` without polling `fut` when the
    /// deadline has already fired, and drops `fut` (cancelling it) when the
    /// deadline fires while it is pending.
    pub async fn bound<F: Future>(&self, fut: F) -> MenderResult<F::Output> {
        if self.is_expired() {
            return Err(MenderError::SessionTimeout);
        }
        tokio::select! {
            biased;
            _ = self.expired() => Err(MenderError::SessionTimeout),
            out = fut => Ok(out),
        }
    }
}
