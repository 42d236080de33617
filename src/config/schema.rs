//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::port::{DataBits, FlowControl, LineConfig, Parity, PortFilter, StopBits};
use crate::registry::hotplug::DEFAULT_POLL_INTERVAL;
use crate::service::RESET_SETTLE_INTERVAL;
use crate::state::{LineSettings, DEFAULT_BAUD_RATE, DEFAULT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Line settings and port selection
    pub serial: SerialConfig,
    /// Device discovery
    pub discovery: DiscoveryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values serde cannot reject on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        self.serial.line_settings()?;
        if self.discovery.interval_ms == 0 {
            return Err(ConfigError::invalid(
                "discovery.interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate used when a session opens
    pub baud_rate: u32,
    /// Data bits: 7 or 8
    pub data_bits: DataBits,
    /// Stop bits: 1 or 2
    pub stop_bits: StopBits,
    /// Parity: "none", "even" or "odd"
    pub parity: Parity,
    /// Flow control: "none" or "hardware"
    pub flow_control: FlowControl,
    /// Read chunk and write sub-chunk size in bytes
    pub buffer_size: usize,
    /// How long RTS stays asserted during a reset pulse
    pub reset_settle_ms: u64,
    /// Preferred port path or alias
    pub port: Option<String>,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reset_settle_ms: RESET_SETTLE_INTERVAL.as_millis() as u64,
            port: None,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// The line parameters of this section, validated.
    pub fn line_settings(&self) -> ConfigResult<LineSettings> {
        LineSettings::from_config(LineConfig {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: self.flow_control,
            buffer_size: self.buffer_size,
        })
        .map_err(ConfigError::from)
    }

    pub fn line_config(&self) -> ConfigResult<LineConfig> {
        Ok(self.line_settings()?.snapshot())
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// The configured preferred port, aliases resolved.
    pub fn preferred_port(&self) -> Option<String> {
        self.port.as_deref().map(|name| self.resolve_port(name))
    }
}

/// Device discovery configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Poll for attach/detach events
    pub hotplug: bool,
    /// Poll interval in milliseconds
    pub interval_ms: u64,
    /// USB filters applied when requesting a new port
    #[serde(default)]
    pub filters: Vec<PortFilter>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            hotplug: true,
            interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            filters: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Get the poll interval as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error", or a full filter directive
    pub level: String,
    /// Log format: "pretty", "compact", "full"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line format with colors
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
    /// Default tracing-subscriber format
    Full,
}
