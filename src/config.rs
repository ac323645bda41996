//! Runtime configuration, loaded from TOML.
//!
//! Every field is optional; missing fields take the reference values.
//!
//! ```toml
//! device_name = "Korad"
//! connection = "COM5"
//! read_timeout_ms = 1000
//! settle_delay_ms = 300
//! poll_interval_ms = 0
//! command_idle_ms = 1000
//! ```

use std::{fs, path::Path, time::Duration};

use fugit::MillisDurationU32;
use serde::{Deserialize, Serialize};

use crate::{
    announcer::DEFAULT_POLL_INTERVAL, dispatch::DEFAULT_IDLE_DELAY, error::ConfigError,
    transport::SerialSettings,
};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PsuConfig {
    pub device_name: String,
    /// Connection string handed to the port validator, e.g. `COM5` or `/dev/ttyACM0`.
    pub connection: String,
    pub read_timeout_ms: u32,
    /// Pause after every write and every read.
    pub settle_delay_ms: u32,
    /// Pause between two polling sweeps.
    pub poll_interval_ms: u64,
    /// Pause between two command receive attempts.
    pub command_idle_ms: u64,
}

impl Default for PsuConfig {
    fn default() -> Self {
        let serial = SerialSettings::default();
        Self {
            device_name: "Korad".into(),
            connection: "COM5".into(),
            read_timeout_ms: serial.read_timeout.ticks(),
            settle_delay_ms: serial.settle_delay.ticks(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            command_idle_ms: DEFAULT_IDLE_DELAY.as_millis() as u64,
        }
    }
}

impl PsuConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            read_timeout: MillisDurationU32::millis(self.read_timeout_ms),
            settle_delay: MillisDurationU32::millis(self.settle_delay_ms),
            ..SerialSettings::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_idle(&self) -> Duration {
        Duration::from_millis(self.command_idle_ms)
    }
}
