// ABOUTME: Configuration loading for sleeptrack.
// ABOUTME: Reads ~/.sleeptrack/config.toml, falling back to defaults for anything missing.

use std::path::PathBuf;

use serde::Deserialize;

/// Environment variable that overrides the configured data directory.
pub const DATA_DIR_ENV: &str = "SLEEPTRACK_DATA_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub display: DisplayConfig,
}

/// Where session data lives.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Explicit data directory. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Data directory after applying the environment override and defaults.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Ok(raw) = std::env::var(DATA_DIR_ENV) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
        self.data_dir.clone().unwrap_or_else(Config::default_data_dir)
    }
}

/// Log filter used when RUST_LOG is not set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

/// Presentation settings for the default formatter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// chrono strftime pattern for start/end times.
    pub time_format: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time_format: "%a %b %d %Y %H:%M".to_string(),
        }
    }
}

impl Config {
    /// Load config from ~/.sleeptrack/config.toml, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Path to the config file.
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sleeptrack")
            .join("config.toml")
    }

    /// Default data directory, e.g. ~/.local/share/sleeptrack.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sleeptrack")
    }
}
