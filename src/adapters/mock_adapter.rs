//! Mock transport for testing
//!
//! Replays a scripted sequence of reply lines and records every line written.
//! It provides:
//! - Queued replies (one consumed per `read_line`)
//! - One-shot failure injection
//! - A write log for verifying the exact wire traffic
//!
//! State lives behind an `Arc<Mutex<_>>` so a [`MockHandle`] can inspect the
//! traffic after the adapter has been moved into a driver.

use crate::adapters::Transport;
use crate::error::{AppResult, PolarizerError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<String>,
    written: Vec<String>,
    open: bool,
    close_calls: usize,
    fail_next: bool,
}

/// Scripted transport
///
/// # Example
///
/// ```
/// use autopolarizer::adapters::{MockAdapter, Transport};
///
/// let mut adapter = MockAdapter::with_replies(["OK"]);
/// let handle = adapter.handle();
/// adapter.write_all(b"H:1\r\n").unwrap();
/// assert_eq!(adapter.read_line().unwrap(), "OK\r\n");
/// assert_eq!(handle.written(), vec!["H:1"]);
/// ```
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

/// Inspection handle sharing state with a [`MockAdapter`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAdapter {
    /// Create an open adapter with no queued replies
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                open: true,
                ..Default::default()
            })),
        }
    }

    /// Create an adapter that answers with `replies` in order.
    ///
    /// Replies are given without terminator; `\r\n` is appended as the
    /// controller would.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let adapter = Self::new();
        adapter.handle().push_replies(replies);
        adapter
    }

    /// Handle that stays valid after the adapter is moved into a driver
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Queue more replies.
    pub fn push_replies<I, S>(&self, replies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = lock(&self.state);
        for reply in replies {
            state.replies.push_back(format!("{}\r\n", reply.into()));
        }
    }

    /// Queue a reply exactly as given, without adding a terminator.
    pub fn push_raw_reply(&self, line: impl Into<String>) {
        lock(&self.state).replies.push_back(line.into());
    }

    /// Trigger a failure on the next operation
    pub fn trigger_failure(&self) {
        lock(&self.state).fail_next = true;
    }

    /// Lines written so far, terminators stripped
    pub fn written(&self) -> Vec<String> {
        lock(&self.state).written.clone()
    }

    /// Forget the write log
    pub fn clear_written(&self) {
        lock(&self.state).written.clear();
    }

    /// Replies queued but not yet read
    pub fn remaining_replies(&self) -> usize {
        lock(&self.state).replies.len()
    }

    /// False once the adapter has been closed
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Number of `close` calls so far
    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }
}

impl MockState {
    fn check(&mut self) -> AppResult<()> {
        if !self.open {
            return Err(PolarizerError::SerialPortNotConnected);
        }
        if std::mem::take(&mut self.fail_next) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Mock transport failure",
            )
            .into());
        }
        Ok(())
    }
}

impl Transport for MockAdapter {
    fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.check()?;
        let text = String::from_utf8_lossy(bytes);
        state
            .written
            .push(text.trim_end_matches(['\r', '\n']).to_string());
        Ok(())
    }

    fn read_line(&mut self) -> AppResult<String> {
        let mut state = lock(&self.state);
        state.check()?;
        state.replies.pop_front().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "Mock reply queue exhausted").into()
        })
    }

    fn close(&mut self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.open = false;
        state.close_calls += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn info(&self) -> String {
        "MockAdapter".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_are_consumed_in_order() {
        let mut adapter = MockAdapter::with_replies(["OK", "NG"]);
        assert_eq!(adapter.read_line().unwrap(), "OK\r\n");
        assert_eq!(adapter.read_line().unwrap(), "NG\r\n");
        assert!(adapter.read_line().is_err());
    }

    #[test]
    fn test_write_log_strips_terminators() {
        let mut adapter = MockAdapter::new();
        let handle = adapter.handle();
        adapter.write_all(b"Q:\r\n").unwrap();
        adapter.write_all(b"G:").unwrap();
        assert_eq!(handle.written(), vec!["Q:", "G:"]);

        handle.clear_written();
        assert!(handle.written().is_empty());
    }

    #[test]
    fn test_failure_is_one_shot() {
        let mut adapter = MockAdapter::with_replies(["R"]);
        let handle = adapter.handle();

        handle.trigger_failure();
        let err = adapter.write_all(b"!:\r\n").unwrap_err();
        assert!(err.is_transport_failure());

        // The failure flag should have been consumed.
        adapter.write_all(b"!:\r\n").unwrap();
        assert_eq!(adapter.read_line().unwrap(), "R\r\n");
    }

    #[test]
    fn test_closed_adapter_refuses_io() {
        let mut adapter = MockAdapter::with_replies(["OK"]);
        let handle = adapter.handle();

        adapter.close().unwrap();
        adapter.close().unwrap();
        assert!(!handle.is_open());
        assert_eq!(handle.close_calls(), 2);
        assert!(matches!(
            adapter.write_all(b"H:1\r\n"),
            Err(PolarizerError::SerialPortNotConnected)
        ));
        assert_eq!(handle.remaining_replies(), 1);
    }

    #[test]
    fn test_raw_reply_is_returned_verbatim() {
        let mut adapter = MockAdapter::new();
        adapter.handle().push_raw_reply("R\n");
        assert_eq!(adapter.read_line().unwrap(), "R\n");
    }
}
