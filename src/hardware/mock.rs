//! Mock Hardware Implementations
//!
//! `MockGsc01` is a simulated GSC-01 controller that speaks the wire protocol
//! over the [`Transport`] trait, so the real driver can run against it
//! without a serial port.
//!
//! # Behaviour
//!
//! - Positions are tracked in pulses and never wrap (like the controller)
//! - Moves are armed by `M:`/`A:`/`J:` and started by `G:`; `H:1` starts at once
//! - A started move reports `B` for a configurable number of `!:` polls, then `R`
//! - A jog advances `JOG_PULSES_PER_POLL` pulses per `!:` poll until stopped
//! - Unknown or malformed commands answer `NG`

use crate::adapters::Transport;
use crate::error::{AppResult, PolarizerError};
use crate::hardware::protocol::{
    ACCEL_MAX_MS, ACCEL_MIN_MS, BUSY_TOKEN, FAILURE_TOKEN, LINE_TERMINATOR, READY_TOKEN,
    SPEED_MAX_PPS, SPEED_MIN_PPS, SUCCESS_TOKEN,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Pulses a jogging mock stage advances per status poll
pub const JOG_PULSES_PER_POLL: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Relative(i64),
    Absolute(i64),
    Jog(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Motion {
    /// Moving to a target; busy for `remaining_polls` more status polls
    ToTarget { target: i64, remaining_polls: u32 },
    /// Continuous motion, signed step per poll
    Jog { step: i64 },
}

#[derive(Debug)]
struct SimState {
    position: i64,
    pending: Option<Pending>,
    motion: Option<Motion>,
    busy_polls: u32,
    speed: Option<(i64, i64, i64)>,
    garbage_position_replies: usize,
    rejected_prefixes: Vec<String>,
    commands: Vec<String>,
    input: Vec<u8>,
    outbox: VecDeque<String>,
    open: bool,
}

/// Simulated GSC-01 controller
///
/// # Example
///
/// ```
/// use autopolarizer::hardware::gsc01::Gsc01Driver;
/// use autopolarizer::hardware::mock::MockGsc01;
///
/// let controller = MockGsc01::new();
/// let sim = controller.handle();
/// let mut stage = Gsc01Driver::with_transport(controller);
///
/// stage.set_angle(90.0).unwrap();
/// assert_eq!(sim.position(), 1500);
/// ```
pub struct MockGsc01 {
    state: Arc<Mutex<SimState>>,
}

/// Inspection and fault-injection handle for a [`MockGsc01`]
#[derive(Clone)]
pub struct MockGsc01Handle {
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockGsc01 {
    /// Controller at pulse position 0, ready, two busy polls per move
    pub fn new() -> Self {
        Self::with_position(0)
    }

    /// Controller at `position` pulses, ready
    pub fn with_position(position: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                position,
                pending: None,
                motion: None,
                busy_polls: 2,
                speed: None,
                garbage_position_replies: 0,
                rejected_prefixes: Vec::new(),
                commands: Vec::new(),
                input: Vec::new(),
                outbox: VecDeque::new(),
                open: true,
            })),
        }
    }

    /// Number of `B` replies a started move produces before `R`
    pub fn with_busy_polls(self, polls: u32) -> Self {
        lock(&self.state).busy_polls = polls;
        self
    }

    /// Handle for inspecting the simulation after the controller is moved into a driver
    pub fn handle(&self) -> MockGsc01Handle {
        MockGsc01Handle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockGsc01 {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGsc01Handle {
    /// Current pulse position
    pub fn position(&self) -> i64 {
        lock(&self.state).position
    }

    /// Whether a move or jog is in progress
    pub fn is_moving(&self) -> bool {
        lock(&self.state).motion.is_some()
    }

    /// Command lines received so far, without terminators
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Forget the received command log
    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }

    /// Last accepted speed profile as (min, max, acceleration)
    pub fn speed(&self) -> Option<(i64, i64, i64)> {
        lock(&self.state).speed
    }

    /// Answer the next `count` position queries with unparseable text
    pub fn garble_position_replies(&self, count: usize) {
        lock(&self.state).garbage_position_replies = count;
    }

    /// Answer `NG` to every command starting with `prefix`
    pub fn reject_commands_starting_with(&self, prefix: &str) {
        lock(&self.state).rejected_prefixes.push(prefix.to_string());
    }

    /// False once the driver has closed the link
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }
}

impl SimState {
    fn handle_line(&mut self, line: &str) -> String {
        self.commands.push(line.to_string());

        if self
            .rejected_prefixes
            .iter()
            .any(|prefix| line.starts_with(prefix.as_str()))
        {
            return FAILURE_TOKEN.to_string();
        }

        let accepted = match line {
            "!:" => return self.status(),
            "Q:" => return self.position_report(),
            "H:1" => {
                self.start(Motion::ToTarget {
                    target: 0,
                    remaining_polls: self.busy_polls,
                });
                true
            }
            "J:1+" => self.arm(Pending::Jog(JOG_PULSES_PER_POLL)),
            "J:1-" => self.arm(Pending::Jog(-JOG_PULSES_PER_POLL)),
            "G:" => self.go(),
            "L:1" | "L:E" => {
                self.motion = None;
                self.pending = None;
                true
            }
            _ => {
                if let Some(args) = line.strip_prefix("M:1") {
                    parse_signed_pulses(args).is_some_and(|p| self.arm(Pending::Relative(p)))
                } else if let Some(args) = line.strip_prefix("A:1") {
                    parse_signed_pulses(args).is_some_and(|p| self.arm(Pending::Absolute(p)))
                } else if let Some(args) = line.strip_prefix("D:1") {
                    self.set_speed(args)
                } else {
                    false
                }
            }
        };

        let reply = if accepted { SUCCESS_TOKEN } else { FAILURE_TOKEN };
        reply.to_string()
    }

    fn arm(&mut self, pending: Pending) -> bool {
        if self.motion.is_some() {
            return false;
        }
        self.pending = Some(pending);
        true
    }

    fn go(&mut self) -> bool {
        if self.motion.is_some() {
            return false;
        }
        let Some(pending) = self.pending.take() else {
            return false;
        };
        let motion = match pending {
            Pending::Relative(delta) => Motion::ToTarget {
                target: self.position + delta,
                remaining_polls: self.busy_polls,
            },
            Pending::Absolute(target) => Motion::ToTarget {
                target,
                remaining_polls: self.busy_polls,
            },
            Pending::Jog(step) => Motion::Jog { step },
        };
        self.start(motion);
        true
    }

    fn start(&mut self, motion: Motion) {
        debug!(?motion, from = self.position, "MockGsc01: motion started");
        self.motion = Some(motion);
        self.settle_if_done();
    }

    fn settle_if_done(&mut self) {
        if let Some(Motion::ToTarget {
            target,
            remaining_polls: 0,
        }) = self.motion
        {
            self.position = target;
            self.motion = None;
        }
    }

    fn status(&mut self) -> String {
        match &mut self.motion {
            None => READY_TOKEN.to_string(),
            Some(Motion::Jog { step }) => {
                self.position += *step;
                BUSY_TOKEN.to_string()
            }
            Some(Motion::ToTarget {
                remaining_polls, ..
            }) => {
                *remaining_polls = remaining_polls.saturating_sub(1);
                self.settle_if_done();
                BUSY_TOKEN.to_string()
            }
        }
    }

    fn position_report(&mut self) -> String {
        if self.garbage_position_replies > 0 {
            self.garbage_position_replies -= 1;
            return "#####".to_string();
        }
        let sign = if self.position < 0 { '-' } else { ' ' };
        let state = if self.motion.is_some() {
            BUSY_TOKEN
        } else {
            READY_TOKEN
        };
        format!("{sign}{:>9},K,K,{state}", self.position.unsigned_abs())
    }

    fn set_speed(&mut self, args: &str) -> bool {
        let Some(parsed) = parse_speed(args) else {
            return false;
        };
        let (min, max, accel) = parsed;
        let speed_range = SPEED_MIN_PPS..=SPEED_MAX_PPS;
        let valid = speed_range.contains(&min)
            && speed_range.contains(&max)
            && max >= min
            && (ACCEL_MIN_MS..=ACCEL_MAX_MS).contains(&accel);
        if valid {
            self.speed = Some(parsed);
        }
        valid
    }
}

/// `+P1500` / `-P20`
fn parse_signed_pulses(args: &str) -> Option<i64> {
    let (negative, rest) = match args.as_bytes().first()? {
        b'+' => (false, &args[1..]),
        b'-' => (true, &args[1..]),
        _ => return None,
    };
    let magnitude: i64 = rest.strip_prefix('P')?.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// `S500F5000R200`
fn parse_speed(args: &str) -> Option<(i64, i64, i64)> {
    let rest = args.strip_prefix('S')?;
    let (min, rest) = rest.split_once('F')?;
    let (max, accel) = rest.split_once('R')?;
    Some((min.parse().ok()?, max.parse().ok()?, accel.parse().ok()?))
}

impl Transport for MockGsc01 {
    fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(PolarizerError::SerialPortNotConnected);
        }
        state.input.extend_from_slice(bytes);

        while let Some(end) = state.input.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = state.input.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            let reply = state.handle_line(&line);
            state.outbox.push_back(format!("{reply}{LINE_TERMINATOR}"));
        }
        Ok(())
    }

    fn read_line(&mut self) -> AppResult<String> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(PolarizerError::SerialPortNotConnected);
        }
        state.outbox.pop_front().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "MockGsc01 has nothing to say").into()
        })
    }

    fn close(&mut self) -> AppResult<()> {
        lock(&self.state).open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn info(&self) -> String {
        "MockGsc01".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(controller: &mut MockGsc01, line: &str) -> String {
        controller
            .write_all(format!("{line}\r\n").as_bytes())
            .unwrap();
        controller
            .read_line()
            .unwrap()
            .trim_end()
            .to_string()
    }

    #[test]
    fn test_relative_move_requires_go() {
        let mut controller = MockGsc01::new().with_busy_polls(1);
        let sim = controller.handle();

        assert_eq!(exchange(&mut controller, "M:1+P3000"), "OK");
        assert_eq!(exchange(&mut controller, "!:"), "R");
        assert_eq!(sim.position(), 0);

        assert_eq!(exchange(&mut controller, "G:"), "OK");
        assert_eq!(exchange(&mut controller, "!:"), "B");
        assert_eq!(exchange(&mut controller, "!:"), "R");
        assert_eq!(sim.position(), 3000);
    }

    #[test]
    fn test_go_without_pending_move_is_rejected() {
        let mut controller = MockGsc01::new();
        assert_eq!(exchange(&mut controller, "G:"), "NG");
    }

    #[test]
    fn test_position_report_format() {
        let mut controller = MockGsc01::with_position(-1000);
        assert_eq!(exchange(&mut controller, "Q:"), "-     1000,K,K,R");

        let mut controller = MockGsc01::with_position(42);
        assert_eq!(exchange(&mut controller, "Q:"), "        42,K,K,R");
    }

    #[test]
    fn test_absolute_move_and_home() {
        let mut controller = MockGsc01::with_position(500).with_busy_polls(0);
        let sim = controller.handle();

        exchange(&mut controller, "A:1-P20");
        exchange(&mut controller, "G:");
        assert_eq!(sim.position(), -20);

        exchange(&mut controller, "H:1");
        assert_eq!(sim.position(), 0);
    }

    #[test]
    fn test_jog_until_stop() {
        let mut controller = MockGsc01::new();
        let sim = controller.handle();

        exchange(&mut controller, "J:1-");
        exchange(&mut controller, "G:");
        assert_eq!(exchange(&mut controller, "!:"), "B");
        assert_eq!(exchange(&mut controller, "!:"), "B");
        assert_eq!(sim.position(), -2 * JOG_PULSES_PER_POLL);

        assert_eq!(exchange(&mut controller, "L:E"), "OK");
        assert_eq!(exchange(&mut controller, "!:"), "R");
        assert!(!sim.is_moving());
    }

    #[test]
    fn test_speed_validation() {
        let mut controller = MockGsc01::new();
        let sim = controller.handle();

        assert_eq!(exchange(&mut controller, "D:1S500F5000R200"), "OK");
        assert_eq!(sim.speed(), Some((500, 5000, 200)));
        assert_eq!(exchange(&mut controller, "D:1S50F5000R200"), "NG");
        assert_eq!(exchange(&mut controller, "D:1S600F500R200"), "NG");
        assert_eq!(exchange(&mut controller, "D:1S500F5000"), "NG");
        assert_eq!(sim.speed(), Some((500, 5000, 200)));
    }

    #[test]
    fn test_fault_injection() {
        let mut controller = MockGsc01::new();
        let sim = controller.handle();

        sim.garble_position_replies(1);
        assert_eq!(exchange(&mut controller, "Q:"), "#####");
        assert!(exchange(&mut controller, "Q:").starts_with(' '));

        sim.reject_commands_starting_with("H:");
        assert_eq!(exchange(&mut controller, "H:1"), "NG");
        assert_eq!(exchange(&mut controller, "X:"), "NG");
    }

    #[test]
    fn test_split_writes_are_reassembled() {
        let mut controller = MockGsc01::new();
        controller.write_all(b"!").unwrap();
        assert!(controller.read_line().is_err());
        controller.write_all(b":\r\n").unwrap();
        assert_eq!(controller.read_line().unwrap(), "R\r\n");
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_signed_pulses("+P1500"), Some(1500));
        assert_eq!(parse_signed_pulses("-P20"), Some(-20));
        assert_eq!(parse_signed_pulses("P20"), None);
        assert_eq!(parse_signed_pulses("+1500"), None);
        assert_eq!(parse_speed("S100F200R0"), Some((100, 200, 0)));
        assert_eq!(parse_speed("S100R0"), None);
    }
}
