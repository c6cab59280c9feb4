//! Driver tests against the simulated GSC-01
//!
//! Unlike the scripted-reply tests, these let `MockGsc01` track the stage
//! position, so multi-step scenarios check where the stage actually ends up.

use autopolarizer::error::{AppResult, PolarizerError};
use autopolarizer::hardware::capabilities::{Homeable, Movable};
use autopolarizer::hardware::mock::{MockGsc01, MockGsc01Handle, JOG_PULSES_PER_POLL};
use autopolarizer::hardware::{Gsc01Driver, Gsc01Options, Reply, StageStatus, WaitPolicy};
use std::time::Duration;

fn fast_options() -> Gsc01Options {
    Gsc01Options {
        wait: WaitPolicy::default().with_poll_interval(Duration::ZERO),
        ..Default::default()
    }
}

fn simulated(position: i64) -> (Gsc01Driver<MockGsc01>, MockGsc01Handle) {
    let controller = MockGsc01::with_position(position);
    let sim = controller.handle();
    (Gsc01Driver::new(controller, fast_options()), sim)
}

/// Distance between two angles on the circle
fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

// =============================================================================
// Rotation scenarios
// =============================================================================

#[test]
fn test_reset_then_step_through_a_turn() {
    let (mut stage, sim) = simulated(2345);

    stage.reset().unwrap();
    assert_eq!(sim.position(), 0);

    stage.set_angle(180.0).unwrap();
    assert_eq!(sim.position(), 3000);

    for _ in 0..4 {
        let current = stage.angle().unwrap();
        stage.set_angle(current + 45.0).unwrap();
    }

    // Four +45° steps from 180° crosses 360° and keeps counting up
    assert_eq!(sim.position(), 6000);
    assert!(angular_distance(stage.angle().unwrap(), 0.0) < 1e-9);
    assert!(!sim.is_moving());
}

#[test]
fn test_every_move_is_forward() {
    let (mut stage, sim) = simulated(0);

    let mut last = sim.position();
    for target in [90.0, 10.0, 350.0, 0.0, 270.0, 269.0] {
        stage.set_angle(target).unwrap();
        let now = sim.position();
        assert!(now >= last, "moved backwards going to {target}°");
        last = now;
    }

    assert!(sim
        .commands()
        .iter()
        .filter(|c| c.starts_with("M:"))
        .all(|c| c.starts_with("M:1+P")));
}

#[test]
fn test_reaches_target_within_one_pulse() {
    let (mut stage, sim) = simulated(0);
    let step = stage.calibration().degree_per_pulse();

    for target in [12.345, 100.01, 359.97, 0.03, 200.0, -45.5, 720.9] {
        stage.set_angle(target).unwrap();
        let reached = stage.angle().unwrap();
        assert!(
            angular_distance(reached, target) < step,
            "asked for {target}°, reached {reached}°"
        );

        // Asking again for the same angle must not move the stage
        let before = sim.position();
        sim.clear_commands();
        assert_eq!(stage.set_angle(target).unwrap(), Reply::Ok);
        assert_eq!(sim.position(), before);
        assert_eq!(sim.commands(), vec!["Q:"]);
    }
}

#[test]
fn test_flipped_holder() {
    let (mut stage, sim) = simulated(0);
    stage.set_flip_front(true);

    stage.set_angle(90.0).unwrap();
    // 90° seen from the back is stage 270°
    assert_eq!(sim.position(), 4500);
    assert!(angular_distance(stage.angle().unwrap(), 90.0) < 1e-9);

    stage.set_angle(60.0).unwrap();
    assert_eq!(sim.position(), 4500 + 500);
}

#[test]
fn test_rotation_issues_query_move_go_then_polls() {
    let controller = MockGsc01::new().with_busy_polls(3);
    let sim = controller.handle();
    let mut stage = Gsc01Driver::new(controller, fast_options());

    stage.set_angle(180.0).unwrap();

    let commands = sim.commands();
    assert_eq!(&commands[..3], ["Q:", "M:1+P3000", "G:"]);
    assert!(commands[3..].iter().all(|c| c == "!:"));
    assert_eq!(commands.len(), 3 + 4);
}

#[test]
fn test_no_wait_leaves_stage_moving() {
    let (mut stage, sim) = simulated(0);
    stage.set_auto_wait(false);

    stage.set_angle(30.0).unwrap();
    assert!(sim.is_moving());

    stage.wait_until_stopped().unwrap();
    assert!(!sim.is_moving());
    assert_eq!(sim.position(), 500);
}

// =============================================================================
// Jog, stop and speed
// =============================================================================

#[test]
fn test_jog_then_stop() {
    let (mut stage, sim) = simulated(0);

    assert_eq!(stage.jog_plus().unwrap(), Reply::Ok);
    for _ in 0..3 {
        assert_eq!(stage.is_stopped().unwrap(), StageStatus::Busy);
    }
    assert_eq!(sim.position(), 3 * JOG_PULSES_PER_POLL);

    assert_eq!(stage.stop(true).unwrap(), Reply::Ok);
    assert_eq!(stage.is_stopped().unwrap(), StageStatus::Ready);
    assert_eq!(sim.position(), 3 * JOG_PULSES_PER_POLL);
}

#[test]
fn test_moves_are_refused_while_jogging() {
    let (mut stage, _sim) = simulated(0);
    stage.jog_minus().unwrap();

    assert_eq!(stage.move_relative_pulses(100).unwrap(), Reply::Failed);
    stage.stop(false).unwrap();
    assert_eq!(stage.move_relative_pulses(100).unwrap(), Reply::Ok);
}

#[test]
fn test_speed_profile_reaches_controller() {
    let (mut stage, sim) = simulated(0);

    stage.set_speed(50.0, 30.0, 2000.0).unwrap();
    assert_eq!(sim.speed(), Some((100, 100, 1000)));

    stage.set_speed(500.0, 5000.0, 200.0).unwrap();
    assert_eq!(sim.speed(), Some((500, 5000, 200)));
}

#[test]
fn test_rejected_speed_is_reported_not_raised() {
    let (mut stage, sim) = simulated(0);
    sim.reject_commands_starting_with("D:");

    assert_eq!(stage.set_speed(500.0, 5000.0, 200.0).unwrap(), Reply::Failed);
    assert_eq!(sim.speed(), None);
}

// =============================================================================
// Faults
// =============================================================================

#[test]
fn test_garbled_position_is_retried() {
    let (mut stage, sim) = simulated(1500);
    sim.garble_position_replies(4);

    assert!((stage.angle().unwrap() - 90.0).abs() < 1e-9);
    assert_eq!(sim.commands(), vec!["Q:"; 5]);
}

#[test]
fn test_garbled_position_gives_up() {
    let (mut stage, sim) = simulated(1500);
    sim.garble_position_replies(5);

    assert!(matches!(
        stage.set_angle(0.0),
        Err(PolarizerError::PositionUnavailable { .. })
    ));
    assert_eq!(sim.position(), 1500);
}

#[test]
fn test_close_releases_controller() {
    let (stage, sim) = simulated(0);
    stage.close().unwrap();
    assert!(!sim.is_open());
}

// =============================================================================
// Capability traits
// =============================================================================

fn home_then_rotate<S: Movable + Homeable>(stage: &mut S, degrees: f64) -> AppResult<f64> {
    stage.home()?;
    stage.move_abs(degrees)?;
    stage.wait_settled()?;
    stage.position()
}

#[test]
fn test_generic_caller() {
    let (mut stage, sim) = simulated(777);

    let angle = home_then_rotate(&mut stage, 45.0).unwrap();
    assert!((angle - 45.0).abs() < 1e-9);
    assert_eq!(sim.position(), 750);
}

#[test]
fn test_rejected_move_surfaces_as_error() {
    let (mut stage, sim) = simulated(0);
    sim.reject_commands_starting_with("M:");

    let err = stage.move_abs(10.0).unwrap_err();
    assert!(matches!(err, PolarizerError::Rejected { ref command } if command == "M:1+P166"));
}
