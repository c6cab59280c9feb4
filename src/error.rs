//! Custom error types for the polarizer driver.
//!
//! This module defines `PolarizerError`, the single error type returned by the
//! library. It uses `thiserror` so that underlying errors (I/O, serial port,
//! configuration) convert automatically with the `?` operator.
//!
//! ## Error Hierarchy
//!
//! - **Transport failures** (`Io`, `Serial`, `ReadTimeout`, `SerialUnexpectedEof`,
//!   `SerialPortNotConnected`): the link to the controller is broken. These are
//!   always propagated and never retried by the driver.
//! - **Protocol anomalies** (`InvalidUtf8`, `PositionUnavailable`): the link works
//!   but the controller's replies could not be interpreted.
//! - **Rejections** (`Rejected`): the controller answered `NG`. The driver's own
//!   API reports these as `Reply::Failed`; only the capability traits raise them.
//! - **Waiting** (`WaitTimeout`, `WaitCancelled`): a bounded poll loop gave up.
//! - **Configuration** (`Config`, `Configuration`, `InvalidAngle`,
//!   `SerialFeatureDisabled`): the caller asked for something impossible.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, PolarizerError>;

/// Every failure the library can report.
#[derive(Error, Debug)]
pub enum PolarizerError {
    /// Underlying read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened or configured
    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Operation on a transport that has been closed
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// The port returned zero bytes
    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    /// Built without the `instrument_serial` feature
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// No complete reply line within the read timeout
    #[error("Serial read timeout after {0:?}")]
    ReadTimeout(Duration),

    /// Reply bytes are not UTF-8
    #[error("Controller reply is not valid UTF-8")]
    InvalidUtf8,

    /// Every position query came back unparseable
    #[error("Position unavailable after {attempts} attempts (last reply: {last_reply:?})")]
    PositionUnavailable {
        /// Queries sent
        attempts: usize,
        /// Text of the final reply
        last_reply: String,
    },

    /// The wait deadline passed with the stage still busy
    #[error("Stage did not stop within {0:?}")]
    WaitTimeout(Duration),

    /// A [`CancelToken`](crate::hardware::CancelToken) ended the wait
    #[error("Wait for stage cancelled")]
    WaitCancelled,

    /// The controller answered `NG`
    #[error("Controller rejected command '{command}'")]
    Rejected {
        /// Wire form of the rejected command
        command: String,
    },

    /// Target angle is NaN or infinite
    #[error("Invalid target angle: {0}")]
    InvalidAngle(f64),

    /// Configuration could not be loaded or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed validation
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl PolarizerError {
    /// Whether the link to the controller itself failed.
    ///
    /// Callers that want to retry an operation should only do so when this is
    /// `false`; a broken transport has to be reopened first.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            PolarizerError::Io(_)
            | PolarizerError::SerialPortNotConnected
            | PolarizerError::SerialUnexpectedEof
            | PolarizerError::ReadTimeout(_) => true,
            #[cfg(feature = "instrument_serial")]
            PolarizerError::Serial(_) => true,
            _ => false,
        }
    }
}
