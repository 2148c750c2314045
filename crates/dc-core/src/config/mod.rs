//! Configuration management for devconnect

mod settings;

pub use settings::{
    parse_walltime, validate_walltime, Cluster, Settings, SubmissionMode, ValidatedSettings,
    DEFAULT_CONNECTION_TIMEOUT, DEFAULT_WALLTIME,
};

use crate::error::ConfigError;
use crate::traits::SettingsSource;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devconnect")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// Settings read from a TOML file on every load
///
/// A missing file yields [`Settings::default`].
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileSettings {
    fn default() -> Self {
        Self::new(default_config_path())
    }
}

impl SettingsSource for FileSettings {
    fn load(&self) -> Result<Settings, ConfigError> {
        match load_config(&self.path) {
            Ok(settings) => Ok(settings),
            Err(ConfigError::NotFound(path)) => {
                tracing::debug!("No config at {:?}, using defaults", path);
                Ok(Settings::default())
            }
            Err(e) => Err(e),
        }
    }
}
