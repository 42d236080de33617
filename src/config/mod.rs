//! Configuration module for serial-session.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_SESSION_CONFIG` environment variable (explicit path)
//! 2. `./serial-session.toml` (current directory)
//! 3. `~/.config/serial-session/config.toml` (Linux; the platform equivalent elsewhere)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is: `SERIAL_SESSION_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SERIAL_SESSION_SERIAL_BAUD_RATE=9600`
//! - `SERIAL_SESSION_SERIAL_PORT=/dev/ttyUSB0`
//! - `SERIAL_SESSION_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_session::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Baud rate: {}", config.serial.baud_rate);
//! println!("Hot-plug polling: {}", config.discovery.hotplug);
//! # Ok::<(), serial_session::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{Config, DiscoveryConfig, LogFormat, LoggingConfig, SerialConfig};
