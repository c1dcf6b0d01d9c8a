//! Cooperative cancellation and the sleep seam used by the retry policy.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Returned by [`Sleeper::sleep`] when the wait was cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Something that can wait for a while and be told to stop waiting.
///
/// The resolver never calls [`std::thread::sleep`] directly; every cooldown
/// goes through this trait so tests can observe the waits without incurring
/// them.
pub trait Sleeper {
    /// Wait for `duration`, or return early with [`Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if cancellation was requested before or during
    /// the wait.
    fn sleep(&self, duration: Duration) -> Result<(), Cancelled>;

    /// Whether cancellation has been requested.
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        (**self).sleep(duration)
    }

    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// A cloneable cancellation signal whose sleeps wake up as soon as it fires.
///
/// ```
/// use std::time::Duration;
/// use tg_avail::cancel::{CancelToken, Sleeper};
///
/// let token = CancelToken::new();
/// token.cancel();
/// assert!(token.sleep(Duration::from_secs(60)).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Create a token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token, waking every thread sleeping on it.
    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    /// Fire the token from a background thread once `after` has elapsed.
    ///
    /// The timer thread exits early if the token is fired by someone else.
    pub fn cancel_after(&self, after: Duration) {
        let token = self.clone();
        std::thread::spawn(move || {
            if token.sleep(after).is_ok() {
                tracing::warn!(after_secs = after.as_secs(), "deadline reached, cancelling");
                token.cancel();
            }
        });
    }
}

impl Sleeper for CancelToken {
    fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let (flag, wake) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *cancelled {
                return Err(Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            cancelled = wake
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_sleeps_to_completion() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.sleep(Duration::from_millis(5)), Ok(()));
    }

    #[test]
    fn cancelled_token_refuses_to_sleep() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.sleep(Duration::from_secs(3600)), Err(Cancelled));
    }

    #[test]
    fn cancel_wakes_a_sleeping_thread() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || sleeper.sleep(Duration::from_secs(3600)));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(handle.join().unwrap(), Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn cancel_after_fires() {
        let token = CancelToken::new();
        token.cancel_after(Duration::from_millis(10));
        assert_eq!(token.sleep(Duration::from_secs(3600)), Err(Cancelled));
    }

    #[test]
    fn cancel_token_is_send_sync() {
        fn assert_normal<T: Sized + Send + Sync>() {}
        assert_normal::<CancelToken>();
    }
}
