//! Cancellation token for blocking control-session reads.
//!
//! A `CancellationToken` is shared between the thread blocked in
//! [`ControlSession::receive`](crate::control::ControlSession::receive) and
//! whoever wants to interrupt it. Besides the flag, the token keeps a list of
//! wakers so that cancelling also wakes the exact wait queue the reader is
//! parked on, instead of relying on polling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Waker = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    next_waker: AtomicU64,
    wakers: Mutex<Vec<(u64, Waker)>>,
}

/// A cancellation token for cooperative cancellation of blocking reads.
///
/// This token can be cloned and shared across threads. When `cancel()` is
/// called on any clone, all clones observe the cancellation and every
/// registered waker runs once.
///
/// # Example
///
/// ```
/// use rina_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every registered waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);

        // Run wakers outside the list lock: a waker may take other locks.
        let wakers: Vec<Waker> = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, waker)| waker.clone())
            .collect();
        for waker in wakers {
            waker();
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// Register a waker that runs when the token is cancelled.
    ///
    /// The waker is removed when the returned guard is dropped. If the token
    /// is already cancelled the waker runs immediately.
    pub fn on_cancel(&self, waker: impl Fn() + Send + Sync + 'static) -> WakerGuard {
        let id = self.inner.next_waker.fetch_add(1, Ordering::Relaxed);
        let waker: Waker = Arc::new(waker);
        self.inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, waker.clone()));

        if self.is_cancelled() {
            waker();
        }

        WakerGuard {
            token: self.clone(),
            id,
        }
    }
}

/// Keeps a waker registered on a [`CancellationToken`] while alive.
pub struct WakerGuard {
    token: CancellationToken,
    id: u64,
}

impl Drop for WakerGuard {
    fn drop(&mut self) {
        self.token
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::RinaError {
    fn from(_: CancelledError) -> Self {
        crate::error::RinaError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
        assert_eq!(token2.check(), Err(CancelledError));
    }

    #[test]
    fn test_waker_runs_on_cancel() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let _guard = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        token.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_guard_unregisters_waker() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        drop(token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        token.cancel();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_waker_registered_after_cancel_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _guard = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_error_display() {
        assert_eq!(CancelledError.to_string(), "Operation was cancelled");
    }
}
