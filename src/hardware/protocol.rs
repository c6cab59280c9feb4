//! OptoSigma GSC-01 command/response codec
//!
//! Reference: GSC-01 single-axis stage controller instruction manual
//!
//! Protocol Overview:
//! - Format: one ASCII command per line, terminated by CR+LF
//! - Baud: 9600, 8N1 by default
//! - Every command is answered by exactly one line
//! - Motion/config commands answer `OK` or `NG`
//! - `!:` answers `R` (ready) or `B` (busy)
//! - `Q:` answers `{position},{ack1},{ack2},{ack3}` with a space-padded signed position
//!
//! | Command | Wire form |
//! |---|---|
//! | Home | `H:1` |
//! | Jog | `J:1+` / `J:1-` |
//! | Go | `G:` |
//! | Stop | `L:1` (decelerate) / `L:E` (immediate) |
//! | Status | `!:` |
//! | Speed | `D:1S{min}F{max}R{accel}` |
//! | Relative move | `M:1{+/-}P{pulses}` |
//! | Absolute move | `A:1{+/-}P{pulses}` |
//! | Position | `Q:` |

use crate::adapters::Transport;
use crate::error::AppResult;
use std::fmt;
use tracing::trace;

/// Reply to an accepted command
pub const SUCCESS_TOKEN: &str = "OK";
/// Reply to a rejected command
pub const FAILURE_TOKEN: &str = "NG";
/// `!:` reply when the stage is stopped
pub const READY_TOKEN: &str = "R";
/// `!:` reply while the stage is moving
pub const BUSY_TOKEN: &str = "B";
/// Ends every command and reply line
pub const LINE_TERMINATOR: &str = "\r\n";

/// Valid speed range in pulses per second
pub const SPEED_MIN_PPS: i64 = 100;
/// Upper bound of the speed range
pub const SPEED_MAX_PPS: i64 = 20_000;
/// Valid acceleration/deceleration time in milliseconds
pub const ACCEL_MIN_MS: i64 = 0;
/// Upper bound of the acceleration time
pub const ACCEL_MAX_MS: i64 = 1_000;

/// Rotation sense as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Away from the limit sensor
    Plus,
    /// Toward the limit sensor
    Minus,
}

impl Direction {
    fn sign(self) -> char {
        match self {
            Direction::Plus => '+',
            Direction::Minus => '-',
        }
    }
}

/// How `L:` brings the stage to rest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Ramp down using the configured acceleration time
    Decelerate,
    /// Emergency stop, no ramp
    Immediate,
}

/// Minimum speed, maximum speed and acceleration time, already clamped to
/// what the controller accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedProfile {
    /// Start speed (PPS)
    pub min: u32,
    /// Cruise speed (PPS)
    pub max: u32,
    /// Ramp time (ms)
    pub acceleration_ms: u32,
}

impl SpeedProfile {
    /// Build a profile the controller will accept.
    ///
    /// `max` is raised to at least `min` first; then every value is truncated
    /// to an integer and clamped independently (speeds to 100..=20000 PPS,
    /// acceleration to 0..=1000 ms).
    pub fn clamped(min: f64, max: f64, acceleration_ms: f64) -> Self {
        let max = max.max(min);
        Self {
            min: clamp_truncated(min, SPEED_MIN_PPS, SPEED_MAX_PPS),
            max: clamp_truncated(max, SPEED_MIN_PPS, SPEED_MAX_PPS),
            acceleration_ms: clamp_truncated(acceleration_ms, ACCEL_MIN_MS, ACCEL_MAX_MS),
        }
    }
}

impl Default for SpeedProfile {
    fn default() -> Self {
        Self::clamped(500.0, 5000.0, 200.0)
    }
}

fn clamp_truncated(value: f64, low: i64, high: i64) -> u32 {
    // `as` truncates toward zero and saturates; NaN becomes 0
    let clamped = (value as i64).clamp(low, high);
    u32::try_from(clamped).unwrap_or(0)
}

/// One logical controller command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Return to mechanical origin
    Home,
    /// Arm continuous motion; starts on `Go`
    Jog(Direction),
    /// Start the armed motion
    Go,
    /// Stop motion
    Stop(StopMode),
    /// Ready/busy query
    Status,
    /// Set the speed profile
    SetSpeed(SpeedProfile),
    /// Arm a relative move of the given signed pulse count
    MoveRelative(i64),
    /// Arm an absolute move to the given signed pulse position
    MoveAbsolute(i64),
    /// Position report
    QueryPosition,
    /// Pass-through text for commands without a dedicated variant
    Raw(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Home => f.write_str("H:1"),
            Command::Jog(direction) => write!(f, "J:1{}", direction.sign()),
            Command::Go => f.write_str("G:"),
            Command::Stop(StopMode::Decelerate) => f.write_str("L:1"),
            Command::Stop(StopMode::Immediate) => f.write_str("L:E"),
            Command::Status => f.write_str("!:"),
            Command::SetSpeed(speed) => write!(
                f,
                "D:1S{}F{}R{}",
                speed.min, speed.max, speed.acceleration_ms
            ),
            Command::MoveRelative(pulses) => write_move(f, 'M', *pulses),
            Command::MoveAbsolute(pulses) => write_move(f, 'A', *pulses),
            Command::QueryPosition => f.write_str("Q:"),
            Command::Raw(text) => f.write_str(text),
        }
    }
}

fn write_move(f: &mut fmt::Formatter<'_>, code: char, pulses: i64) -> fmt::Result {
    let sign = if pulses >= 0 { '+' } else { '-' };
    write!(f, "{}:1{}P{}", code, sign, pulses.unsigned_abs())
}

impl Command {
    /// Wire bytes for this command, terminator included
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}{LINE_TERMINATOR}").into_bytes()
    }
}

/// Decoded controller reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK`
    Ok,
    /// `NG`
    Failed,
    /// Anything else, terminator stripped (status characters, position reports)
    Raw(String),
}

impl Reply {
    /// `OK`
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok)
    }

    /// `NG`
    pub fn is_failed(&self) -> bool {
        matches!(self, Reply::Failed)
    }

    /// The reply text as received (without terminator)
    pub fn as_str(&self) -> &str {
        match self {
            Reply::Ok => SUCCESS_TOKEN,
            Reply::Failed => FAILURE_TOKEN,
            Reply::Raw(text) => text,
        }
    }

}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpret one reply line.
///
/// The trailing line terminator (any mix of CR/LF) is removed; the remaining
/// text is compared against the success and failure tokens verbatim.
pub fn decode(line: &str) -> Reply {
    let text = line.trim_end_matches(['\r', '\n']);
    match text {
        SUCCESS_TOKEN => Reply::Ok,
        FAILURE_TOKEN => Reply::Failed,
        other => Reply::Raw(other.to_string()),
    }
}

/// Write one command and read exactly one reply line.
///
/// Transport errors propagate unchanged.
pub fn send_and_receive<T: Transport + ?Sized>(
    transport: &mut T,
    command: &Command,
) -> AppResult<Reply> {
    transport.write_all(&command.encode())?;
    let line = transport.read_line()?;
    let reply = decode(&line);
    trace!(command = %command, reply = %reply, "GSC-01 exchange");
    Ok(reply)
}

/// Parse the pulse position from a `Q:` reply.
///
/// The position is the first comma-separated field; the controller pads it
/// with spaces between sign and digits (e.g. `-     1000`), so all spaces are
/// removed before parsing.
pub fn parse_position(reply: &str) -> Option<i64> {
    let field = reply.split(',').next()?;
    let digits: String = field.chars().filter(|c| *c != ' ').collect();
    digits.parse().ok()
}
