// Configuration File Support
//
// TOML configuration for the extendipede server and command gate, with
// environment variable overrides. The file is loaded from the XDG config
// directory: ~/.config/extendipede/config.toml
//
// A `profile` (development, production, testing) picks the baseline
// defaults; values present in the file are layered on top of that baseline
// section by section, then EXTENDIPEDE_* variables are applied last.

use crate::gate::{
    default_allowed_commands, default_deny_patterns, DEFAULT_MAX_COMMAND_LENGTH,
    DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_SECS,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Upper bound accepted for the execution timeout
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Deployment profile selecting baseline defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Development,
    Production,
    Testing,
}

impl std::str::FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" | "default" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "testing" | "test" => Ok(Self::Testing),
            other => anyhow::bail!(
                "Invalid profile: {}. Must be one of: development, production, testing",
                other
            ),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Baseline profile
    pub profile: Profile,

    /// HTTP listener configuration
    pub server: ServerConfig,

    /// Command validation and execution settings
    pub gate: GateConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,

    pub port: u16,

    /// Allowed CORS origins; "*" allows any origin, empty disables CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Command gate configuration
///
/// Read once at startup; the gate never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum raw command length in characters
    pub max_command_length: usize,

    /// Execution timeout in seconds
    pub timeout_secs: u64,

    /// Maximum captured bytes per output stream
    pub max_output_bytes: usize,

    /// Working directory for children (default: inherit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Allowed command names and their informational argument templates
    pub allowed_commands: BTreeMap<String, Vec<String>>,

    /// Case-insensitive phrases that block a command
    pub deny_patterns: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_command_length: DEFAULT_MAX_COMMAND_LENGTH,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            working_dir: None,
            allowed_commands: default_allowed_commands(),
            deny_patterns: default_deny_patterns(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl LoggingConfig {
    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve Prometheus metrics
    pub enabled: bool,

    /// Port for the metrics listener
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_profile(Profile::Development)
    }
}

/// Just enough of the file to learn its profile
#[derive(Deserialize)]
struct ProfileHeader {
    profile: Option<Profile>,
}

impl Config {
    /// Baseline configuration for a profile
    pub fn for_profile(profile: Profile) -> Self {
        let mut config = Self {
            profile,
            server: ServerConfig::default(),
            gate: GateConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        };

        match profile {
            Profile::Development => {
                config.logging.level = "debug".to_string();
            }
            Profile::Production => {
                config.logging.level = "warn".to_string();
                config.logging.format = "json".to_string();
                config.server.cors_origins = Vec::new();
            }
            Profile::Testing => {
                config.logging.level = "debug".to_string();
                config.gate.timeout_secs = 5;
            }
        }

        config
    }

    /// Load configuration from the default XDG config directory
    ///
    /// If the config file does not exist, returns the profile defaults with
    /// environment overrides applied.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load from `path`, reading overrides through `env`
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();

        let env_profile = env("EXTENDIPEDE_PROFILE").and_then(|p| p.parse::<Profile>().ok());

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config = Self::from_toml_str(&content, env_profile)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::for_profile(env_profile.unwrap_or_default())
        };

        let config = config.apply_env_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML, layering each section over the profile baseline
    ///
    /// A key present in the file replaces the baseline value wholesale, so
    /// an `allowed_commands` table in the file is the complete allowlist.
    pub fn from_toml_str(content: &str, profile_override: Option<Profile>) -> Result<Self> {
        let header: ProfileHeader = toml::from_str(content)?;
        let profile = profile_override
            .or(header.profile)
            .unwrap_or_default();

        let mut base = match toml::Value::try_from(Self::for_profile(profile))
            .context("Failed to serialize baseline configuration")?
        {
            toml::Value::Table(table) => table,
            other => anyhow::bail!("Baseline configuration is not a table: {}", other.type_str()),
        };
        let overlay: toml::Table = toml::from_str(content)?;

        for (section, value) in overlay {
            match (base.get_mut(&section), value) {
                (Some(toml::Value::Table(base_section)), toml::Value::Table(file_section)) => {
                    for (key, value) in file_section {
                        base_section.insert(key, value);
                    }
                }
                (_, value) => {
                    base.insert(section, value);
                }
            }
        }
        base.insert(
            "profile".to_string(),
            toml::Value::try_from(profile).context("Failed to serialize profile")?,
        );

        let config: Config = toml::Value::Table(base).try_into()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/extendipede/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "extendipede", "Extendipede")
        {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("extendipede")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - EXTENDIPEDE_HOST, EXTENDIPEDE_PORT, EXTENDIPEDE_CORS_ORIGINS
    /// - EXTENDIPEDE_COMMAND_TIMEOUT, EXTENDIPEDE_MAX_COMMAND_LENGTH
    /// - EXTENDIPEDE_LOG_LEVEL, EXTENDIPEDE_LOG_FORMAT
    /// - EXTENDIPEDE_METRICS_ENABLED, EXTENDIPEDE_METRICS_PORT
    ///
    /// Values that fail to parse or are out of range are ignored.
    fn apply_env_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(host) = env("EXTENDIPEDE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env("EXTENDIPEDE_PORT").and_then(|p| p.parse::<u16>().ok()) {
            if port > 0 {
                self.server.port = port;
            }
        }
        if let Some(origins) = env("EXTENDIPEDE_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }

        // Gate overrides
        if let Some(secs) = env("EXTENDIPEDE_COMMAND_TIMEOUT").and_then(|s| s.parse::<u64>().ok()) {
            if secs > 0 && secs <= MAX_TIMEOUT_SECS {
                self.gate.timeout_secs = secs;
            }
        }
        if let Some(len) = env("EXTENDIPEDE_MAX_COMMAND_LENGTH").and_then(|s| s.parse::<usize>().ok())
        {
            if len > 0 {
                self.gate.max_command_length = len;
            }
        }

        // Logging overrides
        if let Some(level) = env("EXTENDIPEDE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env("EXTENDIPEDE_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Metrics overrides
        if let Some(enabled) = env("EXTENDIPEDE_METRICS_ENABLED") {
            self.metrics.enabled = enabled.to_lowercase().parse().unwrap_or(self.metrics.enabled);
        }
        if let Some(port) = env("EXTENDIPEDE_METRICS_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.metrics.port = port;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }
        if self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }
        if self.metrics.enabled && self.metrics.port == self.server.port {
            anyhow::bail!("Metrics port must differ from server port");
        }

        let gate = &self.gate;
        if gate.max_command_length == 0 {
            anyhow::bail!("Maximum command length must be > 0");
        }
        if gate.timeout_secs == 0 || gate.timeout_secs > MAX_TIMEOUT_SECS {
            anyhow::bail!("Command timeout must be between 1 and {} seconds", MAX_TIMEOUT_SECS);
        }
        if gate.max_output_bytes == 0 {
            anyhow::bail!("Maximum output size must be > 0");
        }
        if gate.allowed_commands.is_empty() {
            anyhow::bail!("Allowlist is empty; no command could ever run");
        }
        for name in gate.allowed_commands.keys() {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                anyhow::bail!("Allowed command '{}' must be a single non-empty word", name);
            }
        }

        Ok(())
    }
}
