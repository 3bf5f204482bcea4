use docsync_core::config::{DEFAULT_DEBOUNCE_MS, DEFAULT_POLL_INTERVAL_MS};
use docsync_core::{MergePolicy, SyncSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn set(&mut self, value: T, source: ConfigSource) {
        self.value = value;
        self.source = source;
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize)]
pub struct SyncConfig {
    /// Sync runs only when enabled
    pub enabled: ConfigValue<bool>,
    /// Quiet period before an edit is saved
    pub debounce_ms: ConfigValue<u64>,
    /// Minimum merge confidence before local text wins outright
    pub merge_threshold: ConfigValue<f64>,
    /// How often file subscriptions look for changes from other processes
    pub poll_interval_ms: ConfigValue<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: ConfigValue::new(true, ConfigSource::Default),
            debounce_ms: ConfigValue::new(DEFAULT_DEBOUNCE_MS, ConfigSource::Default),
            merge_threshold: ConfigValue::new(
                MergePolicy::DEFAULT_THRESHOLD,
                ConfigSource::Default,
            ),
            poll_interval_ms: ConfigValue::new(DEFAULT_POLL_INTERVAL_MS, ConfigSource::Default),
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the document store
    pub data_dir: ConfigValue<PathBuf>,
    /// Signed-in user
    pub user_id: ConfigValue<Option<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    user_id: Option<String>,
    sync: Option<SyncFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SyncFile {
    enabled: Option<bool>,
    debounce_ms: Option<u64>,
    merge_threshold: Option<f64>,
    poll_interval_ms: Option<u64>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut data_dir = ConfigValue::new(Self::default_data_dir(), ConfigSource::Default);
        let mut user_id = ConfigValue::new(None, ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(dir) = file_config.data_dir {
                // Resolve relative paths against config file's directory
                let resolved = if dir.is_relative() {
                    path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
                } else {
                    dir
                };
                data_dir.set(resolved, ConfigSource::File);
            }
            if let Some(user) = file_config.user_id {
                user_id.set(Some(user), ConfigSource::File);
            }
            if let Some(file_sync) = file_config.sync {
                if let Some(enabled) = file_sync.enabled {
                    sync.enabled.set(enabled, ConfigSource::File);
                }
                if let Some(ms) = file_sync.debounce_ms {
                    sync.debounce_ms.set(ms, ConfigSource::File);
                }
                if let Some(threshold) = file_sync.merge_threshold {
                    sync.merge_threshold.set(threshold, ConfigSource::File);
                }
                if let Some(ms) = file_sync.poll_interval_ms {
                    sync.poll_interval_ms.set(ms, ConfigSource::File);
                }
            }
        }

        // Apply environment variable overrides
        if let Ok(dir) = std::env::var("DOCSYNC_DATA_DIR") {
            data_dir.set(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(user) = std::env::var("DOCSYNC_USER") {
            user_id.set(Some(user), ConfigSource::Environment);
        }
        if let Ok(raw) = std::env::var("DOCSYNC_DEBOUNCE_MS") {
            let ms = raw
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("DOCSYNC_DEBOUNCE_MS", raw.clone()))?;
            sync.debounce_ms.set(ms, ConfigSource::Environment);
        }
        if let Ok(raw) = std::env::var("DOCSYNC_SYNC_ENABLED") {
            let enabled = parse_bool(&raw)
                .ok_or_else(|| ConfigError::InvalidEnv("DOCSYNC_SYNC_ENABLED", raw.clone()))?;
            sync.enabled.set(enabled, ConfigSource::Environment);
        }

        Ok(Self {
            data_dir,
            user_id,
            config_file,
            sync,
        })
    }

    /// Library settings derived from this configuration.
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            debounce_ms: self.sync.debounce_ms.value,
            merge_threshold: self.sync.merge_threshold.value,
            poll_interval_ms: self.sync.poll_interval_ms.value,
            ..SyncSettings::default()
        }
    }

    /// The configured user, or an error telling how to set one.
    pub fn require_user(&self) -> Result<String, ConfigError> {
        self.user_id.value.clone().ok_or(ConfigError::MissingUser)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/docsync/
    /// - macOS: ~/Library/Application Support/docsync/
    /// - Windows: %APPDATA%/docsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/docsync/
    /// - macOS: ~/Library/Application Support/docsync/
    /// - Windows: %APPDATA%/docsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(&'static str, String),
    MissingUser,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
            ConfigError::MissingUser => write!(
                f,
                "No user configured. Set user_id in the config file or DOCSYNC_USER."
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
