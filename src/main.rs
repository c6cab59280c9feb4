//! CLI Entry Point for autopolarizer
//!
//! Rotates the polarizer to one angle and exits.
//!
//! # Usage
//!
//! ```bash
//! autopolarizer 45 --port /dev/ttyUSB0
//! autopolarizer 90 --reset --config config/autopolarizer.toml
//! autopolarizer 180 --mock          # simulated controller, no hardware
//! ```

use anyhow::{Context, Result};
use autopolarizer::adapters::Transport;
use autopolarizer::config::PolarizerConfig;
use autopolarizer::hardware::capabilities::{Homeable, Movable};
use autopolarizer::hardware::mock::MockGsc01;
use autopolarizer::hardware::Gsc01Driver;
use autopolarizer::tracing_setup;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "autopolarizer")]
#[command(about = "Rotate an automatic polarizer holder to a given angle", long_about = None)]
struct Cli {
    /// Angle of polarizer [deg]
    #[arg(allow_negative_numbers = true)]
    degree: f64,

    /// Serial port name (overrides the config file)
    #[arg(short, long)]
    port: Option<String>,

    /// Return to the mechanical origin before rotating
    #[arg(short, long)]
    reset: bool,

    /// Configuration file; missing files fall back to defaults
    #[arg(long, default_value = "config/autopolarizer.toml")]
    config: PathBuf,

    /// Holder is mounted facing the other way
    #[arg(long)]
    flip: bool,

    /// Return as soon as motion has started
    #[arg(long)]
    no_wait: bool,

    /// Drive a simulated controller instead of a serial port
    #[arg(long)]
    mock: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;

    if cli.mock {
        info!("Using simulated GSC-01");
        let stage = Gsc01Driver::new(MockGsc01::new(), config.stage.options());
        return rotate(stage, &config, &cli);
    }

    open_and_rotate(&config, &cli)
}

fn load_config(cli: &Cli) -> Result<PolarizerConfig> {
    let mut config = PolarizerConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.flip {
        config.stage.flip_front = true;
    }
    if cli.no_wait {
        config.stage.auto_wait = false;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(feature = "instrument_serial")]
fn open_and_rotate(config: &PolarizerConfig, cli: &Cli) -> Result<()> {
    let stage = Gsc01Driver::open(config)
        .with_context(|| format!("Failed to open polarizer on '{}'", config.serial.port))?;
    rotate(stage, config, cli)
}

#[cfg(not(feature = "instrument_serial"))]
fn open_and_rotate(_config: &PolarizerConfig, _cli: &Cli) -> Result<()> {
    anyhow::bail!("Serial support not enabled. Rebuild with --features instrument_serial, or pass --mock")
}

fn rotate<T: Transport>(
    mut stage: Gsc01Driver<T>,
    config: &PolarizerConfig,
    cli: &Cli,
) -> Result<()> {
    info!(transport = %stage.transport().info(), "Connected");

    let speed = config.speed.profile();
    if stage.set_speed_profile(speed)?.is_failed() {
        warn!(?speed, "Controller rejected speed profile; keeping its current speed");
    }

    if cli.reset {
        stage.home().context("Homing failed")?;
    }

    stage
        .move_abs(cli.degree)
        .with_context(|| format!("Failed to rotate to {}°", cli.degree))?;

    let angle = stage.position()?;
    println!("Polarizer at {angle:.3}°");

    stage.close()?;
    Ok(())
}
