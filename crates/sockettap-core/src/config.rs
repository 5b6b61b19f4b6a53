//! Settings for sockettap
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation of the loaded settings
//!
//! The tap core itself only consumes already-validated [`SocketTapSettings`];
//! everything else here serves the host that builds it.

use crate::matcher::MatchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapSettings {
    /// General settings
    pub general: GeneralSettings,

    /// Tap behavior
    pub tap: SocketTapSettings,

    /// Where accepted traces go
    pub output: OutputSettings,

    /// Statistics naming
    pub stats: StatsSettings,
}

/// General settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Submission mode as written in settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapMode {
    Streamed,
    #[default]
    Buffered,
}

impl std::str::FromStr for TapMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "streamed" | "streaming" => Ok(TapMode::Streamed),
            "buffered" => Ok(TapMode::Buffered),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid tap mode: {}. Must be one of: [\"streamed\", \"buffered\"]",
                other
            ))),
        }
    }
}

/// Tap behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketTapSettings {
    /// Streamed or buffered submission
    pub mode: TapMode,

    /// Read payload bytes kept per buffered trace
    pub max_buffered_rx_bytes: u64,

    /// Written payload bytes kept per buffered trace
    pub max_buffered_tx_bytes: u64,

    /// Which connections are emitted
    #[serde(rename = "match")]
    pub match_config: MatchConfig,
}

impl Default for SocketTapSettings {
    fn default() -> Self {
        Self {
            mode: TapMode::Buffered,
            max_buffered_rx_bytes: 1024,
            max_buffered_tx_bytes: 1024,
            match_config: MatchConfig::Any,
        }
    }
}

/// Sink selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// All records in one JSON-lines file
    #[default]
    Jsonl,
    /// One file per traced connection
    FilePerTap,
}

/// How payload bytes are rendered in JSON output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    /// Base64 encoded bytes
    #[default]
    JsonBodyAsBytes,
    /// UTF-8 text, invalid sequences replaced
    JsonBodyAsString,
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Sink kind
    pub sink: SinkKind,

    /// Output file for the JSONL sink
    pub path: String,

    /// Path prefix for the file-per-tap sink
    pub path_prefix: String,

    /// Payload rendering
    pub format: BodyFormat,

    /// Records queued for the writer before new ones are dropped
    pub queue_capacity: usize,

    /// Flush after each record
    pub flush_each: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            sink: SinkKind::Jsonl,
            path: "/var/lib/sockettap/traces.jsonl".to_string(),
            path_prefix: "/var/lib/sockettap/trace".to_string(),
            format: BodyFormat::JsonBodyAsBytes,
            queue_capacity: 1024,
            flush_each: true,
        }
    }
}

/// Statistics naming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    /// Prefix for every counter name
    pub prefix: String,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            prefix: "transport.tap.".to_string(),
        }
    }
}

/// Configuration loader with discovery and merging
pub struct ConfigLoader {
    /// Explicit config path from CLI
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set explicit config path from CLI
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with full discovery and env overrides
    pub fn load(&self) -> ConfigResult<TapSettings> {
        let mut config = if let Some(path) = self.discover_config_file() {
            info!("Loading config from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            TapSettings::default()
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        validate(&config)?;

        Ok(config)
    }

    /// Load a specific file, failing if it does not exist
    pub fn load_path(path: &Path) -> ConfigResult<TapSettings> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let config = Self::new().load_from_file(path)?;
        validate(&config)?;
        Ok(config)
    }

    /// Discover config file location
    ///
    /// Priority:
    /// 1. CLI --config flag
    /// 2. SOCKETTAP_CONFIG environment variable
    /// 3. ~/.config/sockettap/config.toml
    /// 4. /etc/sockettap/config.toml (Unix only)
    fn discover_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("SOCKETTAP_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("SOCKETTAP_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/sockettap/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn load_from_file(&self, path: &Path) -> ConfigResult<TapSettings> {
        let content = std::fs::read_to_string(path)?;
        let config: TapSettings = toml::from_str(&content)?;
        Ok(config)
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("sockettap").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `SOCKETTAP_*` overrides read through `lookup`
pub fn apply_env_overrides<F>(config: &mut TapSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("SOCKETTAP_LOG_LEVEL") {
        config.general.log_level = val;
    }

    if let Some(val) = lookup("SOCKETTAP_MODE") {
        match val.parse() {
            Ok(mode) => config.tap.mode = mode,
            Err(e) => warn!("Ignoring SOCKETTAP_MODE: {}", e),
        }
    }
    if let Some(val) = lookup("SOCKETTAP_MAX_BUFFERED_RX_BYTES") {
        if let Ok(bytes) = val.parse() {
            config.tap.max_buffered_rx_bytes = bytes;
        }
    }
    if let Some(val) = lookup("SOCKETTAP_MAX_BUFFERED_TX_BYTES") {
        if let Ok(bytes) = val.parse() {
            config.tap.max_buffered_tx_bytes = bytes;
        }
    }

    if let Some(val) = lookup("SOCKETTAP_OUTPUT_PATH") {
        config.output.path = val;
    }
    if let Some(val) = lookup("SOCKETTAP_OUTPUT_PATH_PREFIX") {
        config.output.path_prefix = val;
    }
    if let Some(val) = lookup("SOCKETTAP_QUEUE_CAPACITY") {
        if let Ok(capacity) = val.parse() {
            config.output.queue_capacity = capacity;
        }
    }
}

/// Validate settings
pub fn validate(config: &TapSettings) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.general.log_level.to_lowercase().as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid log level: {}. Must be one of: {:?}",
            config.general.log_level, valid_levels
        )));
    }

    if config.output.queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "Output queue capacity cannot be 0".to_string(),
        ));
    }

    match config.output.sink {
        SinkKind::Jsonl if config.output.path.is_empty() => {
            return Err(ConfigError::ValidationError(
                "JSONL sink requires an output path".to_string(),
            ));
        }
        SinkKind::FilePerTap if config.output.path_prefix.is_empty() => {
            return Err(ConfigError::ValidationError(
                "File-per-tap sink requires a path prefix".to_string(),
            ));
        }
        _ => {}
    }

    Ok(())
}

/// Get the user's config directory
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
