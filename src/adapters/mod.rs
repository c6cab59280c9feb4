//! Byte-stream transports the controller driver talks through.
//!
//! The driver only needs three things from a link: send bytes, receive one
//! newline-terminated line, close. Anything providing those can carry the
//! protocol, which is how the tests and the `--mock` CLI mode run without a
//! serial port.

use crate::error::AppResult;

pub mod serial_adapter;
pub use serial_adapter::SerialAdapter;

pub mod mock_adapter;
pub use mock_adapter::{MockAdapter, MockHandle};

/// Line-oriented byte transport to a controller.
pub trait Transport {
    /// Write all bytes to the link.
    fn write_all(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Read one line, including its `\n` terminator.
    fn read_line(&mut self) -> AppResult<String>;

    /// Release the underlying link. Calling it twice is not an error.
    fn close(&mut self) -> AppResult<()>;

    /// Whether the link can still carry traffic
    fn is_open(&self) -> bool;

    /// Human-readable description for logs
    fn info(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        (**self).write_all(bytes)
    }

    fn read_line(&mut self) -> AppResult<String> {
        (**self).read_line()
    }

    fn close(&mut self) -> AppResult<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn info(&self) -> String {
        (**self).info()
    }
}
