//! Notification Queue
//!
//! Wakeups keyed by [`Handle`], shared by the pipe halves and by listeners.
//! A party that cannot make progress (a reader with no new data, a writer
//! over the pause threshold, an `accept` with an empty backlog) parks on a
//! handle; whoever changes the state notifies that handle.
//!
//! # Lost wakeups
//!
//! Parking is "check the state, then register as a waiter". If the notifier
//! runs between the two steps, the notification finds nobody and the waiter
//! sleeps forever. Both steps therefore happen under the queue lock:
//!
//! ```ignore
//! let lock = queue.get_lock();
//! if must_wait() {
//!     // `wait_async` registers, then releases the lock before suspending
//!     queue.wait_async(handle, debug_hint, lock).await;
//! }
//! ```
//!
//! A notifier calls `notify` after releasing its own state lock.
//!
//! # Closing a handle
//!
//! `unlist` wakes every waiter with [`UNLISTED`]. A `wait_async` on a handle
//! that is not whitelisted resolves at once, so nobody parks on a source
//! that has gone away.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

pub use crate::idgen::{Handle, HandleType, IntCanBeHandle};

/// Notification argument sent to everybody when a handle is unlisted
pub const UNLISTED: IntCanBeHandle = -1;

/// A parked `wait_async` future
struct Waiter {
    wake: oneshot::Sender<IntCanBeHandle>,
    debug_hint: String,
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("debug_hint", &self.debug_hint)
            .finish_non_exhaustive()
    }
}

/// State behind the queue lock
#[derive(Default)]
pub struct InnerState {
    whitelist: HashMap<Handle, String>,
    waiters: HashMap<Handle, Vec<Waiter>>,
}

/// Cloneable handle to one shared queue
#[derive(Clone)]
pub struct NotificationQueueArc {
    inner: Arc<Mutex<InnerState>>,
}

impl NotificationQueueArc {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InnerState::default())),
        }
    }

    /// Lock for the check-then-wait sequence, see the module docs
    pub fn get_lock(&self) -> MutexGuard<'_, InnerState> {
        self.inner.lock()
    }

    /// Accept waits on `handle` from now on
    pub fn whitelist(&self, handle: Handle, debug_hint: &str) {
        let mut state = self.inner.lock();
        if let Some(previous) = state.whitelist.insert(handle, debug_hint.to_string()) {
            log::warn!("queue.whitelist: {handle} registered twice (was '{previous}')");
        }
    }

    #[must_use]
    pub fn is_whitelisted(&self, handle: Handle) -> bool {
        self.inner.lock().whitelist.contains_key(&handle)
    }

    /// Forget `handle` and wake its waiters with [`UNLISTED`]
    pub fn unlist(&self, handle: Handle) {
        let waiters = {
            let mut state = self.inner.lock();
            if state.whitelist.remove(&handle).is_none() {
                log::debug!("queue.unlist: {handle} was not registered");
            }
            state.waiters.remove(&handle)
        };
        Self::wake(handle, UNLISTED, waiters.unwrap_or_default());
    }

    /// Wake everybody parked on `handle`
    pub fn notify(&self, handle: Handle, arg: IntCanBeHandle) {
        let waiters = self.inner.lock().waiters.remove(&handle);
        Self::wake(handle, arg, waiters.unwrap_or_default());
    }

    /// Park on `handle`
    ///
    /// Takes the guard from [`get_lock`](Self::get_lock) and releases it
    /// before returning. The future resolves with the notification
    /// argument, or with [`UNLISTED`] if the handle is not (or no longer)
    /// whitelisted.
    pub fn wait_async(
        &self,
        handle: Handle,
        debug_hint: &str,
        mut lock: MutexGuard<'_, InnerState>,
    ) -> impl Future<Output = IntCanBeHandle> + Send {
        let (tx, rx) = oneshot::channel();

        if lock.whitelist.contains_key(&handle) {
            let parked = lock.waiters.entry(handle).or_default();
            // Futures dropped before a notification (select! losers) leave
            // closed senders behind
            parked.retain(|waiter| !waiter.wake.is_closed());
            parked.push(Waiter {
                wake: tx,
                debug_hint: debug_hint.to_string(),
            });
        } else {
            let _ = tx.send(UNLISTED);
        }
        drop(lock);

        // A sender dropped unsent means the queue itself is gone
        async move { rx.await.unwrap_or(UNLISTED) }
    }

    fn wake(handle: Handle, arg: IntCanBeHandle, waiters: Vec<Waiter>) {
        log::trace!("queue.notify: {handle}, arg={arg}, waiters: {}", waiters.len());
        for waiter in waiters {
            if waiter.wake.send(arg).is_err() {
                log::trace!("queue.notify: {handle}: '{}' no longer waits", waiter.debug_hint);
            }
        }
    }
}

impl fmt::Debug for NotificationQueueArc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("NotificationQueueArc")
            .field("handles", &state.whitelist.len())
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_on_unlisted_handle_resolves_immediately() {
        let queue = NotificationQueueArc::new();
        let handle = Handle::new(7);

        let arg = queue.wait_async(handle, "never listed", queue.get_lock()).await;
        assert_eq!(arg, UNLISTED);
    }

    #[tokio::test]
    async fn test_abandoned_waiters_are_pruned() {
        let queue = NotificationQueueArc::new();
        let handle = Handle::new(8);
        queue.whitelist(handle, "test");

        for _ in 0..10 {
            let fut = queue.wait_async(handle, "abandoned", queue.get_lock());
            drop(fut);
        }
        let _live = queue.wait_async(handle, "live", queue.get_lock());

        let count = queue.get_lock().waiters.get(&handle).map_or(0, Vec::len);
        assert_eq!(count, 1);
        queue.unlist(handle);
    }
}
