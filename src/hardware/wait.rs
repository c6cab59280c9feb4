//! Bounded polling for "wait until the stage stops".
//!
//! Polls a probe at a fixed interval until it reports done, the optional
//! deadline passes, or the optional [`CancelToken`] fires.

use crate::error::{AppResult, PolarizerError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default interval between status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cancellation signal shared between the waiting thread and anyone else.
///
/// Cancelling only ends the wait; it does not stop the stage. Send a stop
/// command for that.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// End any wait watching this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether [`Self::cancel`] has been called since the last reset
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the token can be reused.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// How to wait for motion to finish
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Sleep between probes
    pub poll_interval: Duration,
    /// `None` waits forever
    pub deadline: Option<Duration>,
    /// Checked before every probe
    pub cancel: Option<CancelToken>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: None,
            cancel: None,
        }
    }
}

impl WaitPolicy {
    /// Give up with `WaitTimeout` after `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Give up with `WaitCancelled` once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sleep `interval` between probes
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Call `probe` until it returns `true`.
    ///
    /// The probe runs at least once, even with a zero deadline. Errors from
    /// the probe propagate immediately.
    pub fn poll_until<F>(&self, mut probe: F) -> AppResult<()>
    where
        F: FnMut() -> AppResult<bool>,
    {
        let start = Instant::now();

        loop {
            if self.is_cancelled() {
                return Err(PolarizerError::WaitCancelled);
            }

            if probe()? {
                return Ok(());
            }

            if let Some(deadline) = self.deadline {
                if start.elapsed() >= deadline {
                    return Err(PolarizerError::WaitTimeout(deadline));
                }
            }

            std::thread::sleep(self.poll_interval);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_once_probe_succeeds() {
        let mut calls = 0;
        let policy = WaitPolicy::default().with_poll_interval(Duration::ZERO);
        policy
            .poll_until(|| {
                calls += 1;
                Ok(calls == 3)
            })
            .unwrap();
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_deadline_turns_stall_into_timeout() {
        let policy = WaitPolicy::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_deadline(Duration::from_millis(20));

        let start = Instant::now();
        let err = policy.poll_until(|| Ok(false)).unwrap_err();
        assert!(matches!(err, PolarizerError::WaitTimeout(d) if d == Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_zero_deadline_still_probes_once() {
        let mut calls = 0;
        let policy = WaitPolicy::default().with_deadline(Duration::ZERO);
        policy
            .poll_until(|| {
                calls += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let token = CancelToken::new();
        let policy = WaitPolicy::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_cancel(token.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            token.cancel();
        });

        let err = policy.poll_until(|| Ok(false)).unwrap_err();
        assert!(matches!(err, PolarizerError::WaitCancelled));
        canceller.join().unwrap();
    }

    #[test]
    fn test_probe_errors_propagate() {
        let policy = WaitPolicy::default();
        let err = policy
            .poll_until(|| Err(PolarizerError::SerialUnexpectedEof))
            .unwrap_err();
        assert!(matches!(err, PolarizerError::SerialUnexpectedEof));
    }

    #[test]
    fn test_token_reset() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }
}
