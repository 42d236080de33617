//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_SESSION";

/// Config file name inside the platform config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file name in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "serial-session.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_SESSION_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_SESSION_CONFIG` environment variable (explicit path)
    /// 2. `./serial-session.toml` (current directory)
    /// 3. `<platform config dir>/serial-session/config.toml`
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables can override any config file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    ///
    /// Environment overrides still apply; malformed ones are ignored.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if apply_env_overrides(&mut config).is_err() || config.validate().is_err() {
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to file.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or(ConfigError::NoPath)?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    if let Some(app_config) = get_default_config_path() {
        if app_config.exists() {
            return Some(app_config);
        }
    }

    // 4. No config file found - will use defaults
    None
}

/// Get the default config directory for creating new config files.
///
/// `~/.config/serial-session` on Linux, `~/Library/Application Support/serial-session`
/// on macOS, `%APPDATA%\serial-session\config` on Windows.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-session").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Save configuration to a file.
fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

fn env_var(key: &str) -> (String, Option<String>) {
    let name = format!("{}_{}", ENV_PREFIX, key);
    let value = std::env::var(&name).ok();
    (name, value)
}

fn parse_env<T: FromStr>(name: &str, value: &str, message: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(name, message))
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_SESSION_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_SESSION_SERIAL_BAUD_RATE=9600`
/// - `SERIAL_SESSION_SERIAL_PORT=/dev/ttyUSB0`
/// - `SERIAL_SESSION_DISCOVERY_HOTPLUG=false`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let (name, Some(val)) = env_var("SERIAL_BAUD_RATE") {
        config.serial.baud_rate = parse_env(&name, &val, "Invalid baud rate")?;
    }
    if let (name, Some(val)) = env_var("SERIAL_BUFFER_SIZE") {
        config.serial.buffer_size = parse_env(&name, &val, "Invalid buffer size")?;
    }
    if let (name, Some(val)) = env_var("SERIAL_RESET_SETTLE_MS") {
        config.serial.reset_settle_ms = parse_env(&name, &val, "Invalid settle time")?;
    }
    if let (_, Some(val)) = env_var("SERIAL_PORT") {
        config.serial.port = Some(val);
    }

    // Discovery overrides
    if let (_, Some(val)) = env_var("DISCOVERY_HOTPLUG") {
        let val = val.trim().to_lowercase();
        config.discovery.hotplug = val == "true" || val == "1";
    }
    if let (name, Some(val)) = env_var("DISCOVERY_INTERVAL_MS") {
        config.discovery.interval_ms = parse_env(&name, &val, "Invalid interval")?;
    }

    // Logging overrides
    if let (_, Some(val)) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baud_rate, 115200);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("SERIAL_SESSION_SERIAL_BAUD_RATE", "9600");
        env::set_var("SERIAL_SESSION_DISCOVERY_HOTPLUG", "false");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baud_rate, 9600);
        assert!(!loader.config().discovery.hotplug);

        env::remove_var("SERIAL_SESSION_SERIAL_BAUD_RATE");
        env::remove_var("SERIAL_SESSION_DISCOVERY_HOTPLUG");
    }

    #[test]
    #[serial]
    fn test_malformed_env_override() {
        env::set_var("SERIAL_SESSION_SERIAL_BUFFER_SIZE", "lots");

        let mut config = Config::default();
        let err = apply_env_overrides(&mut config).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));

        // with_defaults falls back rather than failing
        assert_eq!(ConfigLoader::with_defaults().config().serial.buffer_size, 255);

        env::remove_var("SERIAL_SESSION_SERIAL_BUFFER_SIZE");
    }

    #[test]
    #[serial]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("serial-session.toml");

        let mut loader = ConfigLoader::with_defaults();
        loader.config_mut().serial.baud_rate = 57600;
        loader.config_mut().serial.port = Some("/dev/ttyACM0".to_string());
        loader.save_to(&path).unwrap();

        let mut loaded = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(loaded.config().serial.baud_rate, 57600);
        assert_eq!(loaded.config().serial.port.as_deref(), Some("/dev/ttyACM0"));

        std::fs::write(&path, "[serial]\nbaud_rate = 300\n").unwrap();
        loaded.reload().unwrap();
        assert_eq!(loaded.config().serial.baud_rate, 300);
        assert_eq!(loaded.config().serial.port, None);
    }

    #[test]
    #[serial]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigLoader::load_from(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    #[serial]
    fn test_explicit_path_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        env::set_var("SERIAL_SESSION_CONFIG", &path);

        let loader = ConfigLoader::load().unwrap();
        assert_eq!(loader.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(loader.config().logging.level, "debug");

        env::remove_var("SERIAL_SESSION_CONFIG");
    }

    #[test]
    fn test_save_without_path() {
        let loader = ConfigLoader::with_defaults();
        assert!(matches!(
            loader.save(),
            Err(ConfigError::NoPath)
        ));
    }
}
