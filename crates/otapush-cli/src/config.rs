//! Configuration management for otapush
//!
//! Configuration is stored in TOML format next to the per-host directories:
//!
//! - Unix: `~/.config/otapush/config.toml`
//! - Windows: `%APPDATA%\otapush\otapush\config\config.toml`
//!
//! Command line flags override file values.

use std::path::{Path, PathBuf};

use otapush_core::endpoint::Credentials;
use otapush_core::{ConfigDir, SchemePreference, Target, TlsMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// otapush configuration
///
/// # Example TOML
///
/// ```toml
/// [target]
/// host = "gateway"
/// scheme = "auto"  # "auto" | "http" | "https"
/// tls = "self-signed"  # or a comma-separated list of certificate files
/// username = "otapush"
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target configuration
    #[serde(default)]
    pub target: TargetConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Device host, optionally with port
    #[serde(default)]
    pub host: Option<String>,

    /// Scheme: "auto", "http" or "https"
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// TLS selector: "self-signed" or certificate file paths
    #[serde(default)]
    pub tls: Option<String>,

    /// Basic auth user name
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_scheme() -> String {
    "auto".to_string()
}

fn default_username() -> String {
    "otapush".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: None,
            scheme: default_scheme(),
            tls: None,
            username: default_username(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// CLI overrides for configuration values
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub scheme: Option<String>,
    pub tls: Option<String>,
    pub username: Option<String>,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = custom_path {
            Self::load(path)
        } else {
            Self::load_default()
        }
    }

    /// Get default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        ConfigDir::platform().map(|dirs| dirs.root().join("config.toml"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply CLI overrides, CLI takes precedence
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(host) = &overrides.host {
            self.target.host = Some(host.clone());
        }
        if let Some(scheme) = &overrides.scheme {
            self.target.scheme = scheme.clone();
        }
        if let Some(tls) = &overrides.tls {
            self.target.tls = Some(tls.clone());
        }
        if let Some(username) = &overrides.username {
            self.target.username = username.clone();
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_schemes = ["auto", "http", "https"];
        if !valid_schemes
            .iter()
            .any(|scheme| scheme.eq_ignore_ascii_case(&self.target.scheme))
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid scheme '{}'. Valid values: {:?}",
                self.target.scheme, valid_schemes
            )));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        if matches!(&self.target.host, Some(host) if host.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "host must not be empty".to_string(),
            ));
        }

        if matches!(&self.target.tls, Some(tls) if tls.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "tls must be \"self-signed\" or a certificate path".to_string(),
            ));
        }

        Ok(())
    }

    /// Host directories live next to the configuration file.
    pub fn host_lookup(config_path: Option<&Path>) -> ConfigDir {
        config_path
            .and_then(Path::parent)
            .map(ConfigDir::new)
            .or_else(ConfigDir::platform)
            .unwrap_or_else(|| ConfigDir::new("."))
    }

    /// Build the target description for the core library.
    pub fn to_target(&self, password: Option<&str>) -> Result<Target, ConfigError> {
        self.validate()?;
        let host = self.target.host.clone().ok_or_else(|| {
            ConfigError::ValidationError("no target host given (--host or [target] host)".to_string())
        })?;
        let scheme: SchemePreference = self
            .target
            .scheme
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("{e}")))?;

        let mut target = Target::new(host).with_scheme(scheme);
        if let Some(tls) = &self.target.tls {
            target = target.with_tls(TlsMode::from_selector(tls));
        }
        if let Some(password) = password {
            target = target.with_credentials(Credentials {
                username: self.target.username.clone(),
                password: password.to_string(),
            });
        }
        Ok(target)
    }
}
