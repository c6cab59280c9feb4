//! OptoSigma GSC-01 rotation stage driver
//!
//! Drives a TWIN NINES PWA-100 automatic polarizer holder through a GSC-01
//! single-axis controller. The holder has a limit sensor that halts motion in
//! one rotation sense, so every angle change is issued as a non-negative
//! relative move in the other (`+`) sense.
//!
//! # Example Usage
//!
//! With real hardware the driver comes from `Gsc01Driver::open(&config)`
//! (feature `instrument_serial`); any [`Transport`] works the same way.
//!
//! ```
//! use autopolarizer::hardware::gsc01::Gsc01Driver;
//! use autopolarizer::hardware::mock::MockGsc01;
//!
//! # fn main() -> autopolarizer::error::AppResult<()> {
//! let mut stage = Gsc01Driver::with_transport(MockGsc01::new());
//!
//! stage.set_speed(500.0, 5000.0, 200.0)?;
//! stage.reset()?;
//! stage.set_angle(45.0)?;
//! println!("Angle: {:.3}°", stage.angle()?);
//!
//! stage.close()
//! # }
//! ```

use crate::adapters::Transport;
use crate::error::{AppResult, PolarizerError};
use crate::hardware::protocol::{
    self, parse_position, Command, Direction, Reply, SpeedProfile, StopMode, BUSY_TOKEN,
    READY_TOKEN,
};
use crate::hardware::wait::WaitPolicy;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "instrument_serial")]
use crate::adapters::SerialAdapter;
#[cfg(feature = "instrument_serial")]
use crate::config::PolarizerConfig;

/// Degrees per pulse for the PWA-100 on a GSC-01
pub const DEFAULT_DEGREE_PER_PULSE: f64 = 0.060;

/// Default number of `Q:` attempts before giving up on a position
pub const DEFAULT_POSITION_QUERY_ATTEMPTS: usize = 5;

/// Quotients this close to an integer count as that integer before truncation.
const PULSE_SNAP_TOLERANCE: f64 = 1e-6;

/// Fixed conversion between pulses and degrees for one stage/holder pairing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    degree_per_pulse: f64,
}

impl Calibration {
    /// Calibration for a stage turning `degree_per_pulse` per pulse
    pub fn new(degree_per_pulse: f64) -> Self {
        Self { degree_per_pulse }
    }

    /// Degrees per controller pulse
    pub fn degree_per_pulse(&self) -> f64 {
        self.degree_per_pulse
    }

    /// Pulses in one full turn (6000 for the PWA-100)
    pub fn pulses_per_revolution(&self) -> f64 {
        360.0 / self.degree_per_pulse
    }

    /// Degrees to whole pulses, truncated toward zero.
    ///
    /// Floating-point noise is absorbed first: 0.9° / 0.060 evaluates to
    /// 14.999… and still yields 15 pulses.
    pub fn degree_to_position(&self, degrees: f64) -> i64 {
        let quotient = degrees / self.degree_per_pulse;
        let nearest = quotient.round();
        let quotient = if (quotient - nearest).abs() < PULSE_SNAP_TOLERANCE {
            nearest
        } else {
            quotient
        };
        quotient.trunc() as i64
    }

    /// Pulse position to an angle in `[0, 360)`.
    pub fn position_to_degree(&self, position: i64) -> f64 {
        (position as f64).rem_euclid(self.pulses_per_revolution()) * self.degree_per_pulse
    }

    fn whole_pulses_per_revolution(&self) -> i64 {
        (self.pulses_per_revolution().round() as i64).max(1)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(DEFAULT_DEGREE_PER_PULSE)
    }
}

/// Forward-only rotation needed to get from `current` to `target`, in `[0, 360)`.
///
/// With `flip_front` both angles are mirrored first, which reverses the
/// sense of the difference while the stage still turns the same way.
pub fn forward_delta_degrees(current: f64, target: f64, flip_front: bool) -> f64 {
    let target = target.rem_euclid(360.0);
    let (from, to) = if flip_front {
        (360.0 - current, 360.0 - target)
    } else {
        (current, target)
    };
    let delta = (to - from).rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if delta >= 360.0 {
        0.0
    } else {
        delta
    }
}

/// Driver behaviour
#[derive(Debug, Clone)]
pub struct Gsc01Options {
    /// Pulse/degree conversion
    pub calibration: Calibration,
    /// Block after motion commands until the controller reports ready
    pub auto_wait: bool,
    /// Mirror angles for a holder mounted facing the other way
    pub flip_front: bool,
    /// Used by [`Gsc01Driver::wait_until_stopped`]
    pub wait: WaitPolicy,
    /// `Q:` attempts before giving up on a position
    pub position_query_attempts: usize,
}

impl Default for Gsc01Options {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            auto_wait: true,
            flip_front: false,
            wait: WaitPolicy::default(),
            position_query_attempts: DEFAULT_POSITION_QUERY_ATTEMPTS,
        }
    }
}

/// Reply to the `!:` status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    /// `R`: stopped
    Ready,
    /// `B`: moving
    Busy,
    /// Neither ready nor busy; left to the caller to interpret
    Unrecognized(String),
}

impl StageStatus {
    /// `Some(true)` when stopped, `Some(false)` when moving, `None` otherwise
    pub fn is_stopped(&self) -> Option<bool> {
        match self {
            StageStatus::Ready => Some(true),
            StageStatus::Busy => Some(false),
            StageStatus::Unrecognized(_) => None,
        }
    }

    fn from_reply(reply: Reply) -> Self {
        match reply.as_str() {
            READY_TOKEN => StageStatus::Ready,
            BUSY_TOKEN => StageStatus::Busy,
            _ => StageStatus::Unrecognized(reply.as_str().to_string()),
        }
    }
}

/// Driver for an OptoSigma GSC-01 controlling a polarizer holder
///
/// Owns its transport exclusively and closes it when dropped. Every
/// operation is a strictly sequential series of request/reply exchanges;
/// whether the stage is moving is always asked of the controller, never
/// remembered.
pub struct Gsc01Driver<T: Transport> {
    transport: T,
    options: Gsc01Options,
    last_command: Option<Command>,
    last_rejected: Option<Command>,
    closed: bool,
}

#[cfg(feature = "instrument_serial")]
impl Gsc01Driver<SerialAdapter> {
    /// Open the configured serial port and apply the configured stage options.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the port cannot be opened
    pub fn open(config: &PolarizerConfig) -> AppResult<Self> {
        config.validate()?;
        let transport = SerialAdapter::open(&config.serial)?;
        Ok(Self::new(transport, config.stage.options()))
    }
}

impl<T: Transport> Gsc01Driver<T> {
    /// Wrap an open transport
    pub fn new(transport: T, options: Gsc01Options) -> Self {
        Self {
            transport,
            options,
            last_command: None,
            last_rejected: None,
            closed: false,
        }
    }

    /// Driver with default options (auto-wait on, no flip, 0.060 deg/pulse)
    pub fn with_transport(transport: T) -> Self {
        Self::new(transport, Gsc01Options::default())
    }

    /// Current driver options
    pub fn options(&self) -> &Gsc01Options {
        &self.options
    }

    /// Pulse/degree conversion in use
    pub fn calibration(&self) -> Calibration {
        self.options.calibration
    }

    /// Whether motion commands block until the stage stops
    pub fn auto_wait(&self) -> bool {
        self.options.auto_wait
    }

    /// Turn blocking after motion commands on or off
    pub fn set_auto_wait(&mut self, enabled: bool) {
        self.options.auto_wait = enabled;
    }

    /// Whether angles are mirrored
    pub fn flip_front(&self) -> bool {
        self.options.flip_front
    }

    /// Mirror angles for a holder mounted facing the other way
    pub fn set_flip_front(&mut self, enabled: bool) {
        self.options.flip_front = enabled;
    }

    /// Replace the policy used by [`Self::wait_until_stopped`]
    pub fn set_wait_policy(&mut self, policy: WaitPolicy) {
        self.options.wait = policy;
    }

    /// The underlying link
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The most recent command written to the controller
    pub fn last_command(&self) -> Option<&Command> {
        self.last_command.as_ref()
    }

    /// The most recent command the controller answered `NG`
    pub fn last_rejected(&self) -> Option<&Command> {
        self.last_rejected.as_ref()
    }

    /// Close the transport and report the outcome.
    ///
    /// Dropping the driver also closes it, but swallows the error.
    pub fn close(mut self) -> AppResult<()> {
        self.closed = true;
        self.transport.close()
    }

    /// Send one command and decode the reply.
    pub fn execute(&mut self, command: &Command) -> AppResult<Reply> {
        self.last_command = Some(command.clone());
        let reply = protocol::send_and_receive(&mut self.transport, command)?;
        if reply.is_failed() {
            self.last_rejected = Some(command.clone());
        }
        Ok(reply)
    }

    /// Send an arbitrary command line (without terminator).
    pub fn send_command(&mut self, raw: &str) -> AppResult<Reply> {
        self.execute(&Command::Raw(raw.to_string()))
    }

    /// Return to the mechanical origin.
    ///
    /// Waits for the stage to stop when auto-wait is on, even if the
    /// controller rejected `H:1` (it does so while the stage is still busy).
    #[instrument(skip(self), level = "debug")]
    pub fn reset(&mut self) -> AppResult<Reply> {
        info!("Homing stage");
        let reply = self.execute(&Command::Home)?;
        if self.options.auto_wait {
            self.wait_until_stopped()?;
        }
        Ok(reply)
    }

    /// Start continuous `+` rotation; returns once motion has started.
    pub fn jog_plus(&mut self) -> AppResult<Reply> {
        self.jog(Direction::Plus)
    }

    /// Start continuous `-` rotation; returns once motion has started.
    ///
    /// This is the sense that runs into the limit sensor.
    pub fn jog_minus(&mut self) -> AppResult<Reply> {
        self.jog(Direction::Minus)
    }

    fn jog(&mut self, direction: Direction) -> AppResult<Reply> {
        let reply = self.execute(&Command::Jog(direction))?;
        if reply.is_failed() {
            return Ok(Reply::Failed);
        }
        self.execute(&Command::Go)
    }

    /// Decelerating stop, or an immediate one.
    pub fn stop(&mut self, immediate: bool) -> AppResult<Reply> {
        let mode = if immediate {
            StopMode::Immediate
        } else {
            StopMode::Decelerate
        };
        self.execute(&Command::Stop(mode))
    }

    /// Ask the controller whether the stage is ready.
    pub fn is_stopped(&mut self) -> AppResult<StageStatus> {
        let reply = self.execute(&Command::Status)?;
        Ok(StageStatus::from_reply(reply))
    }

    /// Poll until the stage reports ready, using the configured wait policy.
    pub fn wait_until_stopped(&mut self) -> AppResult<()> {
        let policy = self.options.wait.clone();
        self.wait_until_stopped_with(&policy)
    }

    /// Poll until the stage reports ready, honouring `policy`'s deadline and
    /// cancellation token.
    ///
    /// Unrecognized status replies count as "still moving".
    pub fn wait_until_stopped_with(&mut self, policy: &WaitPolicy) -> AppResult<()> {
        policy.poll_until(|| match self.is_stopped()? {
            StageStatus::Ready => Ok(true),
            StageStatus::Busy => Ok(false),
            StageStatus::Unrecognized(reply) => {
                warn!(reply = %reply, "Unrecognized status reply");
                Ok(false)
            }
        })
    }

    /// Set minimum speed, maximum speed (PPS) and acceleration time (ms).
    ///
    /// Values are clamped into the controller's accepted ranges; see
    /// [`SpeedProfile::clamped`].
    pub fn set_speed(&mut self, min: f64, max: f64, acceleration_ms: f64) -> AppResult<Reply> {
        let profile = SpeedProfile::clamped(min, max, acceleration_ms);
        debug!(
            min = profile.min,
            max = profile.max,
            acceleration_ms = profile.acceleration_ms,
            "Setting speed"
        );
        self.set_speed_profile(profile)
    }

    /// Send an already clamped speed profile
    pub fn set_speed_profile(&mut self, profile: SpeedProfile) -> AppResult<Reply> {
        self.execute(&Command::SetSpeed(profile))
    }

    /// Current pulse position reported by the controller.
    ///
    /// Malformed replies are retried up to `position_query_attempts` times;
    /// transport errors are not retried.
    ///
    /// # Errors
    /// Returns `PositionUnavailable` once every attempt came back unparseable
    pub fn query_position(&mut self) -> AppResult<i64> {
        let attempts = self.options.position_query_attempts.max(1);
        let mut last_reply = String::new();

        for attempt in 1..=attempts {
            let reply = self.execute(&Command::QueryPosition)?;
            if let Some(position) = parse_position(reply.as_str()) {
                return Ok(position);
            }
            warn!(attempt, reply = %reply, "Unparseable position reply");
            last_reply = reply.as_str().to_string();
        }

        Err(PolarizerError::PositionUnavailable {
            attempts,
            last_reply,
        })
    }

    /// Current angle in degrees, mirrored when `flip_front` is set.
    pub fn angle(&mut self) -> AppResult<f64> {
        let position = self.query_position()?;
        let degrees = self.options.calibration.position_to_degree(position);
        Ok(if self.options.flip_front {
            360.0 - degrees
        } else {
            degrees
        })
    }

    /// Rotate to `target` degrees, always turning in the `+` sense.
    ///
    /// A target equal to the current angle sends nothing and returns
    /// `Reply::Ok`.
    ///
    /// # Errors
    /// Returns `InvalidAngle` for a non-finite target, and propagates
    /// position, transport and wait failures
    #[instrument(skip(self), level = "debug")]
    pub fn set_angle(&mut self, target: f64) -> AppResult<Reply> {
        if !target.is_finite() {
            return Err(PolarizerError::InvalidAngle(target));
        }

        let current = self.angle()?;
        let delta = forward_delta_degrees(current, target, self.options.flip_front);
        let pulses = self
            .options
            .calibration
            .degree_to_position(delta)
            .rem_euclid(self.options.calibration.whole_pulses_per_revolution());

        if pulses == 0 {
            debug!(current, target, "Already at target angle");
            return Ok(Reply::Ok);
        }

        info!(current, target, delta, pulses, "Rotating polarizer");
        self.move_relative_pulses(pulses)
    }

    /// Relative move by a signed pulse count, then go.
    ///
    /// A rejected move returns `Reply::Failed` without sending `G:`; the
    /// auto-wait follows `G:` whatever its reply.
    ///
    /// Negative counts turn toward the limit sensor; the angle setter never
    /// produces them.
    pub fn move_relative_pulses(&mut self, pulses: i64) -> AppResult<Reply> {
        self.arm_and_go(Command::MoveRelative(pulses))
    }

    /// Absolute move to a pulse position, then go.
    ///
    /// The controller picks the direction, which may cross the limit sensor.
    pub fn move_absolute_pulses(&mut self, position: i64) -> AppResult<Reply> {
        self.arm_and_go(Command::MoveAbsolute(position))
    }

    fn arm_and_go(&mut self, command: Command) -> AppResult<Reply> {
        if self.execute(&command)?.is_failed() {
            return Ok(Reply::Failed);
        }

        let reply = self.execute(&Command::Go)?;
        if self.options.auto_wait {
            self.wait_until_stopped()?;
        }
        Ok(reply)
    }
}

impl<T: Transport> Drop for Gsc01Driver<T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.transport.close() {
            warn!(error = %err, transport = %self.transport.info(), "Failed to close transport");
        }
    }
}
