//! Configuration module for the event sensor.
//!
//! This module provides environment-based configuration for the sensor,
//! including the device identity, collector address, log file locations,
//! polling cadence and signal source selection.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::detector::EdgePolicy;

/// Default device identifier reported to the collector
const DEFAULT_DEVICE_ID: u32 = 1;

/// Default collector host
const DEFAULT_COLLECTOR_HOST: &str = "127.0.0.1";

/// Default collector TCP port
const DEFAULT_COLLECTOR_PORT: u16 = 8080;

/// Default path of the primary (all records) log
const DEFAULT_LOG_FILE: &str = "logfile.csv";

/// Default path of the unsent (failed records) log
const DEFAULT_UNSENT_LOG_FILE: &str = "logfile_unsent.csv";

/// Default poll interval in seconds
const DEFAULT_POLL_INTERVAL_SECS: f64 = 0.5;

/// Default network timeout in seconds, per collector exchange
const DEFAULT_NETWORK_TIMEOUT_SECS: f64 = 1.0;

/// Default GPIO line (BCM numbering)
const DEFAULT_GPIO_PIN: u32 = 5;

/// Default sysfs GPIO root
const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// Poll interval bounds, in seconds
const MIN_POLL_INTERVAL_SECS: f64 = 0.01;
const MAX_POLL_INTERVAL_SECS: f64 = 60.0;

/// Network timeout bounds, in seconds
const MIN_NETWORK_TIMEOUT_SECS: f64 = 0.05;
const MAX_NETWORK_TIMEOUT_SECS: f64 = 60.0;

/// Upper bound for the minimum spacing between two events
const MAX_MIN_EVENT_SPACING_SECS: f64 = 3600.0;

/// Where the sensor reads its signal level from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalSourceKind {
    /// Linux sysfs GPIO line: `<root>/gpio<pin>/value`
    Gpio { pin: u32, root: PathBuf },

    /// Random level flips, for bench runs without hardware
    Simulated,
}

/// Configuration for the event sensor.
///
/// All settings can be configured via environment variables:
/// - `EVENT_SENSOR_DEVICE_ID`: Positive device identifier (default: 1)
/// - `EVENT_SENSOR_COLLECTOR_HOST`: Collector host (default: 127.0.0.1)
/// - `EVENT_SENSOR_COLLECTOR_PORT`: Collector port (default: 8080)
/// - `EVENT_SENSOR_LOG_FILE`: Primary log path (default: logfile.csv)
/// - `EVENT_SENSOR_UNSENT_LOG_FILE`: Unsent log path (default: logfile_unsent.csv)
/// - `EVENT_SENSOR_POLL_INTERVAL_SECS`: Seconds between ticks, fractional (default: 0.5)
/// - `EVENT_SENSOR_NETWORK_TIMEOUT_SECS`: Per-exchange timeout, fractional (default: 1)
/// - `EVENT_SENSOR_SIGNAL_SOURCE`: `gpio` or `simulated` (default: gpio)
/// - `EVENT_SENSOR_GPIO_PIN`: GPIO line number (default: 5)
/// - `EVENT_SENSOR_GPIO_ROOT`: sysfs GPIO root (default: /sys/class/gpio)
/// - `EVENT_SENSOR_EDGE`: `rising` or `falling` (default: rising)
/// - `EVENT_SENSOR_MIN_EVENT_SPACING_SECS`: Debounce spacing, 0 disables (default: 0)
/// - `EVENT_SENSOR_EVENT_MESSAGE`: Message attached to every record (default: `-`)
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this device, always greater than zero
    pub device_id: u32,

    /// Host name or address of the collector
    pub collector_host: String,

    /// TCP port of the collector
    pub collector_port: u16,

    /// Append-only log of every record produced
    pub log_file: PathBuf,

    /// Append-only log of records whose delivery failed
    pub unsent_log_file: PathBuf,

    /// Fixed period of the polling loop
    pub poll_interval: Duration,

    /// Bound on one collector exchange (connect, send and acknowledgment)
    pub network_timeout: Duration,

    /// Signal source the detector samples
    pub signal_source: SignalSourceKind,

    /// Which transition counts as an event
    pub edge: EdgePolicy,

    /// Minimum spacing between two fired events; zero disables debouncing
    pub min_event_spacing: Duration,

    /// Message attached to every record, `-` on the wire when absent
    pub event_message: Option<String>,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Returns a new `Config` instance with values from environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but unparsable or out of
    /// range, if both log paths point at the same file, or if the event
    /// message would break the comma-separated record format.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use event_sensor::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Collector: {}", config.collector_addr());
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let device_id = Self::parse_device_id()?;

        let collector_host = env::var("EVENT_SENSOR_COLLECTOR_HOST")
            .unwrap_or_else(|_| DEFAULT_COLLECTOR_HOST.to_string())
            .trim()
            .to_string();
        if collector_host.is_empty() {
            return Err(ConfigError::for_var(
                "EVENT_SENSOR_COLLECTOR_HOST",
                "collector host must not be empty",
            ));
        }

        let collector_port = Self::parse_collector_port()?;

        let log_file = env_path("EVENT_SENSOR_LOG_FILE", DEFAULT_LOG_FILE);
        let unsent_log_file = env_path("EVENT_SENSOR_UNSENT_LOG_FILE", DEFAULT_UNSENT_LOG_FILE);
        if log_file == unsent_log_file {
            return Err(ConfigError::for_var(
                "EVENT_SENSOR_UNSENT_LOG_FILE",
                "unsent log must be a different file than the primary log",
            ));
        }

        let poll_interval = parse_secs(
            "EVENT_SENSOR_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
            MIN_POLL_INTERVAL_SECS,
            MAX_POLL_INTERVAL_SECS,
        )?;

        let network_timeout = parse_secs(
            "EVENT_SENSOR_NETWORK_TIMEOUT_SECS",
            DEFAULT_NETWORK_TIMEOUT_SECS,
            MIN_NETWORK_TIMEOUT_SECS,
            MAX_NETWORK_TIMEOUT_SECS,
        )?;

        let min_event_spacing = parse_secs(
            "EVENT_SENSOR_MIN_EVENT_SPACING_SECS",
            0.0,
            0.0,
            MAX_MIN_EVENT_SPACING_SECS,
        )?;

        let signal_source = Self::parse_signal_source()?;

        let edge = match env::var("EVENT_SENSOR_EDGE") {
            Ok(value) => value
                .parse::<EdgePolicy>()
                .map_err(|e| ConfigError::for_var("EVENT_SENSOR_EDGE", e))?,
            Err(_) => EdgePolicy::default(),
        };

        let event_message = Self::parse_event_message()?;

        Ok(Self {
            device_id,
            collector_host,
            collector_port,
            log_file,
            unsent_log_file,
            poll_interval,
            network_timeout,
            signal_source,
            edge,
            min_event_spacing,
            event_message,
        })
    }

    /// `host:port` form of the collector address.
    pub fn collector_addr(&self) -> String {
        format!("{}:{}", self.collector_host, self.collector_port)
    }

    /// Parse the device identifier, which must be a positive integer.
    fn parse_device_id() -> Result<u32, ConfigError> {
        let env_var = "EVENT_SENSOR_DEVICE_ID";

        match env::var(env_var) {
            Ok(value) => {
                let device_id: u32 = value.trim().parse().map_err(|_| {
                    ConfigError::for_var(env_var, format!("'{}' is not a valid number", value))
                })?;

                if device_id == 0 {
                    return Err(ConfigError::for_var(
                        env_var,
                        "device id must be greater than 0",
                    ));
                }

                Ok(device_id)
            }
            Err(_) => Ok(DEFAULT_DEVICE_ID),
        }
    }

    /// Parse the collector port; port 0 is rejected.
    fn parse_collector_port() -> Result<u16, ConfigError> {
        let env_var = "EVENT_SENSOR_COLLECTOR_PORT";

        match env::var(env_var) {
            Ok(value) => {
                let port: u16 = value.trim().parse().map_err(|_| {
                    ConfigError::for_var(env_var, format!("'{}' is not a valid port", value))
                })?;

                if port == 0 {
                    return Err(ConfigError::for_var(env_var, "port must be greater than 0"));
                }

                Ok(port)
            }
            Err(_) => Ok(DEFAULT_COLLECTOR_PORT),
        }
    }

    fn parse_signal_source() -> Result<SignalSourceKind, ConfigError> {
        let env_var = "EVENT_SENSOR_SIGNAL_SOURCE";
        let kind = env::var(env_var).unwrap_or_else(|_| "gpio".to_string());

        match kind.trim().to_ascii_lowercase().as_str() {
            "gpio" => {
                let pin = match env::var("EVENT_SENSOR_GPIO_PIN") {
                    Ok(value) => value.trim().parse().map_err(|_| {
                        ConfigError::for_var(
                            "EVENT_SENSOR_GPIO_PIN",
                            format!("'{}' is not a valid number", value),
                        )
                    })?,
                    Err(_) => DEFAULT_GPIO_PIN,
                };
                let root = env_path("EVENT_SENSOR_GPIO_ROOT", DEFAULT_GPIO_ROOT);
                Ok(SignalSourceKind::Gpio { pin, root })
            }
            "simulated" => Ok(SignalSourceKind::Simulated),
            other => Err(ConfigError::for_var(
                env_var,
                format!("unknown signal source '{}', expected 'gpio' or 'simulated'", other),
            )),
        }
    }

    /// The message is embedded verbatim in a comma-separated line, so it may
    /// contain neither commas nor line breaks.
    fn parse_event_message() -> Result<Option<String>, ConfigError> {
        let env_var = "EVENT_SENSOR_EVENT_MESSAGE";

        match env::var(env_var) {
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => {
                if value.contains([',', '\n', '\r']) {
                    return Err(ConfigError::for_var(
                        env_var,
                        "message must not contain commas or line breaks",
                    ));
                }
                Ok(Some(value))
            }
            Err(_) => Ok(None),
        }
    }
}

fn env_path(env_var: &str, default: &str) -> PathBuf {
    env::var_os(env_var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Parse a fractional number of seconds from an environment variable.
fn parse_secs(env_var: &str, default: f64, min: f64, max: f64) -> Result<Duration, ConfigError> {
    let secs = match env::var(env_var) {
        Ok(value) => {
            let secs: f64 = value.trim().parse().map_err(|_| {
                ConfigError::for_var(env_var, format!("'{}' is not a valid number", value))
            })?;

            if !secs.is_finite() || secs < min {
                return Err(ConfigError::for_var(
                    env_var,
                    format!("{} is below minimum ({}s)", value, min),
                ));
            }

            if secs > max {
                return Err(ConfigError::for_var(
                    env_var,
                    format!("{} exceeds maximum ({}s)", value, max),
                ));
            }

            secs
        }
        Err(_) => default,
    };

    Ok(Duration::from_secs_f64(secs))
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID,
            collector_host: DEFAULT_COLLECTOR_HOST.to_string(),
            collector_port: DEFAULT_COLLECTOR_PORT,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            unsent_log_file: PathBuf::from(DEFAULT_UNSENT_LOG_FILE),
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
            network_timeout: Duration::from_secs_f64(DEFAULT_NETWORK_TIMEOUT_SECS),
            signal_source: SignalSourceKind::Gpio {
                pin: DEFAULT_GPIO_PIN,
                root: PathBuf::from(DEFAULT_GPIO_ROOT),
            },
            edge: EdgePolicy::default(),
            min_event_spacing: Duration::ZERO,
            event_message: None,
        }
    }
}
