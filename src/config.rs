//! Configuration System using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults (9600 baud 8N1, 0.060 deg/pulse, speed 500/5000/200)
//! 2. A TOML file (optional)
//! 3. Environment variables prefixed with `AUTOPOLARIZER_`, nested keys
//!    separated by `__` (e.g. `AUTOPOLARIZER_SERIAL__PORT=/dev/ttyUSB1`)
//!
//! # Example
//! ```no_run
//! use autopolarizer::config::PolarizerConfig;
//!
//! let config = PolarizerConfig::load_from("config/polarizer.toml")?;
//! config.validate()?;
//! println!("Port: {}", config.serial.port);
//! # Ok::<(), autopolarizer::error::PolarizerError>(())
//! ```

use crate::error::{AppResult, PolarizerError};
use crate::hardware::gsc01::{Calibration, Gsc01Options};
use crate::hardware::protocol::SpeedProfile;
use crate::hardware::wait::WaitPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "AUTOPOLARIZER_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarizerConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Serial link settings
    pub serial: SerialSettings,
    /// Stage calibration and motion behaviour
    pub stage: StageSettings,
    /// Speed profile applied before moving
    pub speed: SpeedSettings,
}

/// Serial link to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Line speed; the GSC-01 ships set to 9600
    pub baud_rate: u32,
    /// 5..=8
    pub data_bits: u8,
    /// Parity bit mode
    pub parity: ParitySetting,
    /// 1 or 2
    pub stop_bits: u8,
    /// Handshaking mode
    pub flow_control: FlowControlSetting,
    /// How long to wait for one reply line
    pub timeout_ms: u64,
}

/// Serial parity, as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial flow control, as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlSetting {
    /// No handshaking
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Stage calibration and driver flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Degrees rotated per controller pulse
    pub degree_per_pulse: f64,
    /// Block after motion commands until the controller reports ready
    pub auto_wait: bool,
    /// Mirror angles for a holder mounted facing the other way
    pub flip_front: bool,
    /// Delay between status polls while waiting
    pub poll_interval_ms: u64,
    /// Upper bound on a single wait; `None` waits forever
    pub wait_timeout_ms: Option<u64>,
    /// `Q:` attempts before a position counts as unavailable
    pub position_query_attempts: usize,
}

/// Speed profile in controller units (PPS and ms)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedSettings {
    /// Start speed in PPS
    pub min: f64,
    /// Cruise speed in PPS
    pub max: f64,
    /// Ramp time in ms
    pub acceleration_ms: f64,
}

impl Default for PolarizerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            serial: SerialSettings::default(),
            stage: StageSettings::default(),
            speed: SpeedSettings::default(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            parity: ParitySetting::None,
            stop_bits: 1,
            flow_control: FlowControlSetting::None,
            timeout_ms: 5000,
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            degree_per_pulse: 0.060,
            auto_wait: true,
            flip_front: false,
            poll_interval_ms: 10,
            wait_timeout_ms: None,
            position_query_attempts: 5,
        }
    }
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            min: 500.0,
            max: 5000.0,
            acceleration_ms: 200.0,
        }
    }
}

impl SerialSettings {
    /// Read timeout for one reply line
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StageSettings {
    /// Build driver options from these settings.
    pub fn options(&self) -> Gsc01Options {
        Gsc01Options {
            calibration: Calibration::new(self.degree_per_pulse),
            auto_wait: self.auto_wait,
            flip_front: self.flip_front,
            wait: WaitPolicy {
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                deadline: self.wait_timeout_ms.map(Duration::from_millis),
                cancel: None,
            },
            position_query_attempts: self.position_query_attempts,
        }
    }
}

impl SpeedSettings {
    /// Clamp these settings into a profile the controller accepts
    pub fn profile(&self) -> SpeedProfile {
        SpeedProfile::clamped(self.min, self.max, self.acceleration_ms)
    }
}

impl PolarizerConfig {
    /// Figment with defaults and environment overrides but no file.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(PolarizerConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load defaults merged with environment overrides.
    pub fn load() -> AppResult<Self> {
        Ok(Self::figment().extract()?)
    }

    /// Load configuration from a specific TOML file, then apply environment
    /// overrides on top.
    ///
    /// A missing file is not an error; figment treats it as empty.
    ///
    /// # Errors
    /// Returns `Config` if the file is malformed or a value has the wrong type
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let figment = Figment::from(Serialized::defaults(PolarizerConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(figment.extract()?)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    /// Returns `Configuration` describing the first invalid value
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(PolarizerError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(PolarizerError::Configuration(
                "serial.port must not be empty".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(PolarizerError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(PolarizerError::Configuration(format!(
                "Invalid serial.data_bits {}. Must be 5-8",
                self.serial.data_bits
            )));
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            return Err(PolarizerError::Configuration(format!(
                "Invalid serial.stop_bits {}. Must be 1 or 2",
                self.serial.stop_bits
            )));
        }

        let dpp = self.stage.degree_per_pulse;
        if !dpp.is_finite() || dpp <= 0.0 {
            return Err(PolarizerError::Configuration(format!(
                "Invalid stage.degree_per_pulse {dpp}. Must be a positive number"
            )));
        }
        if self.stage.position_query_attempts == 0 {
            return Err(PolarizerError::Configuration(
                "stage.position_query_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_controller_factory_settings() {
        let config = PolarizerConfig::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.data_bits, 8);
        assert_eq!(config.serial.parity, ParitySetting::None);
        assert_eq!(config.serial.stop_bits, 1);
        assert_eq!(config.stage.degree_per_pulse, 0.060);
        assert!(config.stage.auto_wait);
        assert!(!config.stage.flip_front);
        assert_eq!(config.stage.position_query_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PolarizerConfig::default();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = PolarizerConfig::default();
        config.stage.degree_per_pulse = 0.0;
        assert!(config.validate().is_err());

        let mut config = PolarizerConfig::default();
        config.stage.degree_per_pulse = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PolarizerConfig::default();
        config.serial.data_bits = 9;
        assert!(config.validate().is_err());

        let mut config = PolarizerConfig::default();
        config.serial.stop_bits = 3;
        assert!(config.validate().is_err());

        let mut config = PolarizerConfig::default();
        config.stage.position_query_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = PolarizerConfig::default();
        config.serial.port = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn stage_options_carry_wait_policy() {
        let mut stage = StageSettings::default();
        stage.wait_timeout_ms = Some(1500);
        stage.poll_interval_ms = 25;

        let options = stage.options();
        assert_eq!(options.wait.poll_interval, Duration::from_millis(25));
        assert_eq!(options.wait.deadline, Some(Duration::from_millis(1500)));
        assert_eq!(options.calibration.degree_per_pulse(), 0.060);
    }

    #[test]
    fn speed_settings_are_clamped_into_profile() {
        let speed = SpeedSettings {
            min: 50.0,
            max: 30.0,
            acceleration_ms: 2000.0,
        };
        let profile = speed.profile();
        assert_eq!((profile.min, profile.max, profile.acceleration_ms), (100, 100, 1000));
    }
}
