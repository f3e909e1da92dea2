//! Configuration for the fast poller.
//!
//! The JSON5 file is the boundary where the device and poll settings are
//! validated; the core types built from it ([`DeviceEndpoint`], [`PollConfig`])
//! trust what they are given.

use modbus_fast_common::{Format, LoggingConfig, ZenohConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Smallest period the scheduler will ever sleep towards.
pub const MIN_SAMPLE_PERIOD: Duration = Duration::from_millis(1);

/// Maximum number of points one hub may poll.
pub const MAX_COUNT: u16 = 128;

/// Maximum sample period accepted from configuration, in milliseconds.
pub const MAX_SAMPLE_PERIOD_MS: u64 = 10_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusFastConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// The polled device
    pub modbus: DeviceConfig,

    /// Payload encoding for published points
    #[serde(default)]
    pub serialization: Format,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the single polled device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Host address (IP or hostname)
    pub host: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit/slave ID
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Register kind to read
    #[serde(default)]
    pub register_type: RegisterKind,

    /// First address to read (0-based)
    #[serde(default)]
    pub start_address: u16,

    /// Number of consecutive points to read
    #[serde(default = "default_count")]
    pub count: u16,

    /// Target poll period in milliseconds
    #[serde(default = "default_sample_period_ms")]
    pub sample_period_ms: u64,

    /// Display name, used as the device segment of key expressions
    #[serde(default = "default_name")]
    pub name: String,

    /// Only publish points whose value changed
    #[serde(default = "default_only_on_change")]
    pub only_on_change: bool,

    /// Connection timeout in milliseconds (also bounds each request)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Key expression prefix
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_count() -> u16 {
    32
}

fn default_sample_period_ms() -> u64 {
    5
}

fn default_name() -> String {
    "Modbus Fast".to_string()
}

fn default_only_on_change() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_key_prefix() -> String {
    modbus_fast_common::KEY_PREFIX.to_string()
}

/// Modbus register kinds the poller can read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// Holding registers (read/write, 16-bit)
    #[default]
    Holding,
    /// Input registers (read-only, 16-bit)
    Input,
    /// Discrete output coils (read/write, 1-bit)
    Coil,
}

impl RegisterKind {
    /// Return the string name for this register kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterKind::Holding => "holding",
            RegisterKind::Input => "input",
            RegisterKind::Coil => "coil",
        }
    }

    /// Single-letter tag used in point names.
    pub fn letter(&self) -> char {
        match self {
            RegisterKind::Holding => 'H',
            RegisterKind::Input => 'R',
            RegisterKind::Coil => 'C',
        }
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical device on one TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
        }
    }

    /// Stable identifier `host:port:unit`.
    pub fn identifier(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.unit_id)
    }
}

impl std::fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} (unit {})", self.host, self.port, self.unit_id)
    }
}

/// What to read and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub register_kind: RegisterKind,
    pub start_address: u16,
    pub count: u16,
    pub sample_period_ms: u64,
    pub change_only: bool,
}

impl PollConfig {
    /// The period the scheduler aims for, floored at [`MIN_SAMPLE_PERIOD`].
    pub fn target_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms).max(MIN_SAMPLE_PERIOD)
    }
}

impl DeviceConfig {
    /// Minimal configuration for `host` with every other field defaulted.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            unit_id: default_unit_id(),
            register_type: RegisterKind::default(),
            start_address: 0,
            count: default_count(),
            sample_period_ms: default_sample_period_ms(),
            name: default_name(),
            only_on_change: default_only_on_change(),
            connect_timeout_ms: default_connect_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }

    pub fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint::new(self.host.clone(), self.port, self.unit_id)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            register_kind: self.register_type,
            start_address: self.start_address,
            count: self.count,
            sample_period_ms: self.sample_period_ms,
            change_only: self.only_on_change,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate the device section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host cannot be empty".to_string()));
        }

        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("name cannot be empty".to_string()));
        }

        if self.unit_id > 247 {
            return Err(ConfigError::Validation(format!(
                "unit_id must be 0-247, got {}",
                self.unit_id
            )));
        }

        if self.count == 0 || self.count > MAX_COUNT {
            return Err(ConfigError::Validation(format!(
                "count must be 1-{}, got {}",
                MAX_COUNT, self.count
            )));
        }

        if self.sample_period_ms == 0 || self.sample_period_ms > MAX_SAMPLE_PERIOD_MS {
            return Err(ConfigError::Validation(format!(
                "sample_period_ms must be 1-{}, got {}",
                MAX_SAMPLE_PERIOD_MS, self.sample_period_ms
            )));
        }

        if u32::from(self.start_address) + u32::from(self.count) > 0x1_0000 {
            return Err(ConfigError::Validation(format!(
                "start_address {} + count {} exceeds the 16-bit address space",
                self.start_address, self.count
            )));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "key_prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl ModbusFastConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn from_json5(content: &str) -> Result<Self, ConfigError> {
        let config: ModbusFastConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.modbus.validate()
    }
}
