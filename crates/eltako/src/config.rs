use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".into()
}

fn default_mqtt_port() -> u16 {
    1883
}

/// Tilt calibration of a single blind.
///
/// The percentages describe how far past a target position the blind
/// must be driven to angle its blades, depending on the direction of
/// the preceding movement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlindsConfig {
    /// Overshoot applied after a downward movement, in percent.
    #[serde(rename = "tiltDownPercentage", default)]
    pub tilt_down_percentage: f64,
    /// Overshoot applied after an upward movement, in percent.
    #[serde(rename = "tiltUpPercentage", default)]
    pub tilt_up_percentage: f64,
    /// Skip the tilt sequence when the blind is already tilted at the
    /// requested position.
    #[serde(rename = "tiltOptimization", default = "default_true")]
    pub tilt_optimization: bool,
}

impl Default for BlindsConfig {
    fn default() -> Self {
        Self {
            tilt_down_percentage: 0.0,
            tilt_up_percentage: 0.0,
            tilt_optimization: true,
        }
    }
}

/// A configured shading actor.
///
/// A device without an address stays pending until discovery resolves
/// its serial number to one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    /// Network address, absent for devices waiting on discovery.
    #[serde(default)]
    pub ip: Option<String>,
    /// Serial number used to match discovery announcements.
    #[serde(default)]
    pub serial: Option<String>,
    /// Device API login user.
    pub username: String,
    /// Device API login password.
    pub password: String,
    /// Display name, also the command bus topic segment.
    #[serde(default)]
    pub name: String,
    /// Tilt calibration.
    #[serde(rename = "blindsConfig", default)]
    pub blinds_config: BlindsConfig,
}

impl core::fmt::Display for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Device{{name: {}; ip: {}}}",
            self.name,
            self.ip.as_deref().unwrap_or("-")
        )
    }
}

/// Shading actor fleet configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Eltako {
    /// Configured devices.
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Position polling interval in milliseconds; 0 disables polling.
    #[serde(rename = "polling-interval", default)]
    pub polling_interval: u64,
}

impl Eltako {
    /// Finds the configured device with the given serial number.
    #[must_use]
    pub fn device_by_serial(&self, serial: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.serial.as_deref() == Some(serial))
    }
}

/// Command bus connection settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Base topic; commands arrive on `{topic}/{name}/set` and
    /// positions are published to `{topic}/{name}`.
    pub topic: String,
    /// Optional broker user.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional broker password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Command bus settings.
    pub mqtt: MqttConfig,
    /// Shading actor fleet.
    pub eltako: Eltako,
    /// Log level, defaults to `info`.
    #[serde(rename = "loglevel", default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Loads the configuration from a `JSON` file.
    ///
    /// `${VAR}` references are replaced with the value of the
    /// environment variable `VAR` before parsing, so credentials can
    /// be kept out of the file.
    ///
    /// # Errors
    ///
    /// An error is returned when the file cannot be read or does not
    /// contain a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorKind::Config, format!("error reading config file: {e}"))
        })?;
        Self::parse(&data)
    }

    /// Parses the configuration from a `JSON` string, applying
    /// environment substitution first.
    ///
    /// # Errors
    ///
    /// An error is returned when the data does not contain a valid
    /// configuration.
    pub fn parse(data: &str) -> Result<Self> {
        let data = replace_variables(data, |name| std::env::var(name).ok());
        serde_json::from_str(&data)
            .map_err(|e| Error::new(ErrorKind::Config, format!("invalid config: {e}")))
    }
}

// Replaces `${NAME}` references through the given lookup. Unknown
// references are left untouched.
fn replace_variables(data: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(data.len());
    let mut rest = data;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let replaced = after
            .find('}')
            .and_then(|end| lookup(&after[..end]).map(|value| (value, &after[end + 1..])));
        match replaced {
            Some((value, tail)) => {
                result.push_str(&value);
                rest = tail;
            }
            None => {
                result.push_str("${");
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}
