//! Serial Hardware Adapter for RS-232/USB-Serial controllers
//!
//! Wraps the `serialport` crate behind the [`Transport`] trait. The GSC-01 is
//! normally reached through a USB/RS-232 converter at 9600 baud 8N1.

use crate::adapters::Transport;
use crate::config::SerialSettings;
use crate::error::{AppResult, PolarizerError};
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use tracing::{debug, trace};

#[cfg(feature = "instrument_serial")]
use crate::config::{FlowControlSetting, ParitySetting};
#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Internal per-read timeout; the overall line timeout is enforced on top.
#[cfg(feature = "instrument_serial")]
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial transport for RS-232 communication
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    baud_rate: u32,

    /// Maximum time to wait for one reply line
    timeout: Duration,

    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn SerialPort>>,
}

impl SerialAdapter {
    /// Open the serial port described by `settings`.
    ///
    /// # Errors
    /// Returns error if the port cannot be opened or the serial feature is disabled.
    #[cfg(feature = "instrument_serial")]
    pub fn open(settings: &SerialSettings) -> AppResult<Self> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits)?)
            .parity(match settings.parity {
                ParitySetting::None => serialport::Parity::None,
                ParitySetting::Odd => serialport::Parity::Odd,
                ParitySetting::Even => serialport::Parity::Even,
            })
            .stop_bits(match settings.stop_bits {
                2 => serialport::StopBits::Two,
                _ => serialport::StopBits::One,
            })
            .flow_control(match settings.flow_control {
                FlowControlSetting::None => serialport::FlowControl::None,
                FlowControlSetting::Software => serialport::FlowControl::Software,
                FlowControlSetting::Hardware => serialport::FlowControl::Hardware,
            })
            .timeout(PORT_POLL_TIMEOUT)
            .open()?;

        debug!(
            port = %settings.port,
            baud = settings.baud_rate,
            "Serial port opened"
        );

        Ok(Self {
            port_name: settings.port.clone(),
            baud_rate: settings.baud_rate,
            timeout: settings.timeout(),
            port: Some(port),
        })
    }

    /// Always fails: serial support is compiled out
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open(_settings: &SerialSettings) -> AppResult<Self> {
        Err(PolarizerError::SerialFeatureDisabled)
    }

    /// Port the adapter was opened on
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Maximum wait for one reply line
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[cfg(feature = "instrument_serial")]
    fn port_mut(&mut self) -> AppResult<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or(PolarizerError::SerialPortNotConnected)
    }
}

#[cfg(feature = "instrument_serial")]
fn data_bits(bits: u8) -> AppResult<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(PolarizerError::Configuration(format!(
            "Invalid serial.data_bits {other}. Must be 5-8"
        ))),
    }
}

#[cfg(feature = "instrument_serial")]
impl Transport for SerialAdapter {
    fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        use std::io::Write;

        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        trace!(bytes = %String::from_utf8_lossy(bytes).escape_default(), "Serial write");
        Ok(())
    }

    fn read_line(&mut self) -> AppResult<String> {
        use std::io::Read;

        let timeout = self.timeout;
        let port = self.port_mut()?;

        let mut line = Vec::new();
        let mut buffer = [0u8; 1];
        let start = std::time::Instant::now();

        loop {
            if start.elapsed() > timeout {
                return Err(PolarizerError::ReadTimeout(timeout));
            }

            match port.read(&mut buffer) {
                Ok(0) => return Err(PolarizerError::SerialUnexpectedEof),
                Ok(_) => {
                    line.push(buffer[0]);
                    if buffer[0] == b'\n' {
                        break;
                    }
                }
                // Port timeout is shorter than our overall timeout
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let line = String::from_utf8(line).map_err(|_| PolarizerError::InvalidUtf8)?;
        trace!(line = %line.escape_default(), "Serial read");
        Ok(line)
    }

    fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn info(&self) -> String {
        format!("SerialAdapter({} @ {} baud)", self.port_name, self.baud_rate)
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Transport for SerialAdapter {
    fn write_all(&mut self, _bytes: &[u8]) -> AppResult<()> {
        Err(PolarizerError::SerialFeatureDisabled)
    }

    fn read_line(&mut self) -> AppResult<String> {
        Err(PolarizerError::SerialFeatureDisabled)
    }

    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        false
    }

    fn info(&self) -> String {
        format!("SerialAdapter({} @ {} baud)", self.port_name, self.baud_rate)
    }
}
