//! # Automatic Polarizer Holder Control
//!
//! Drives a TWIN NINES PWA-100 automatic polarizer holder through an
//! OptoSigma GSC-01 single-axis stage controller over RS-232.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: the `Transport` trait and its serial and mock implementations.
//! - **`config`**: figment-backed configuration (TOML file plus `AUTOPOLARIZER_*` env vars).
//! - **`error`**: the `PolarizerError` enum shared by every module.
//! - **`hardware`**: the GSC-01 command codec, the angle-to-pulse motion driver,
//!   capability traits, the bounded wait primitive and a simulated controller.
//! - **`tracing_setup`**: `tracing-subscriber` initialisation for binaries.
//!
//! ## Example
//!
//! ```
//! use autopolarizer::hardware::{mock::MockGsc01, Gsc01Driver};
//!
//! let mut stage = Gsc01Driver::with_transport(MockGsc01::new());
//! stage.set_angle(180.0)?;
//! assert!((stage.angle()? - 180.0).abs() < 0.060);
//! # Ok::<(), autopolarizer::error::PolarizerError>(())
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod hardware;
pub mod tracing_setup;

pub use error::{AppResult, PolarizerError};
pub use hardware::{Gsc01Driver, Reply};

/// Driver bound to a real serial port
#[cfg(feature = "instrument_serial")]
pub type SerialPolarizer = Gsc01Driver<adapters::SerialAdapter>;
