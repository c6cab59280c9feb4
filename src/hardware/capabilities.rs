//! Hardware Capabilities
//!
//! Small capability traits that let callers drive a stage without naming its
//! concrete driver. Unlike the driver's own API, which reports a controller
//! rejection as [`Reply::Failed`], these traits turn rejections into
//! [`PolarizerError::Rejected`] so generic code can use `?`.
//!
//! # Example
//!
//! ```rust
//! use autopolarizer::error::AppResult;
//! use autopolarizer::hardware::capabilities::{Homeable, Movable};
//!
//! fn home_then_rotate<S: Movable + Homeable>(stage: &mut S, degrees: f64) -> AppResult<f64> {
//!     stage.home()?;
//!     stage.move_abs(degrees)?;
//!     stage.wait_settled()?;
//!     stage.position()
//! }
//! ```
//!
//! [`PolarizerError::Rejected`]: crate::error::PolarizerError::Rejected

use crate::adapters::Transport;
use crate::error::{AppResult, PolarizerError};
use crate::hardware::gsc01::Gsc01Driver;
use crate::hardware::protocol::{Command, Reply};

/// Capability: Motion Control
///
/// # Contract
/// - Positions are angles in degrees
/// - `move_abs` may return before motion completes (depends on the device's auto-wait)
/// - `wait_settled` blocks until motion completes
pub trait Movable {
    /// Move to an absolute angle
    fn move_abs(&mut self, position: f64) -> AppResult<()>;

    /// Current angle
    fn position(&mut self) -> AppResult<f64>;

    /// Block until the device reports motion is complete
    fn wait_settled(&mut self) -> AppResult<()>;

    /// Stop motion in progress
    fn stop(&mut self) -> AppResult<()>;
}

/// Capability: Return to a mechanical reference
pub trait Homeable {
    /// Move to the reference position, blocking until there if the device waits
    fn home(&mut self) -> AppResult<()>;
}

impl<T: Transport> Gsc01Driver<T> {
    fn require_accepted(&self, reply: Reply) -> AppResult<()> {
        if !reply.is_failed() {
            return Ok(());
        }
        let command = self
            .last_rejected()
            .map(Command::to_string)
            .unwrap_or_default();
        Err(PolarizerError::Rejected { command })
    }
}

impl<T: Transport> Movable for Gsc01Driver<T> {
    fn move_abs(&mut self, position: f64) -> AppResult<()> {
        let reply = self.set_angle(position)?;
        self.require_accepted(reply)
    }

    fn position(&mut self) -> AppResult<f64> {
        self.angle()
    }

    fn wait_settled(&mut self) -> AppResult<()> {
        self.wait_until_stopped()
    }

    fn stop(&mut self) -> AppResult<()> {
        let reply = Gsc01Driver::stop(self, false)?;
        self.require_accepted(reply)
    }
}

impl<T: Transport> Homeable for Gsc01Driver<T> {
    fn home(&mut self) -> AppResult<()> {
        let reply = self.reset()?;
        self.require_accepted(reply)
    }
}
