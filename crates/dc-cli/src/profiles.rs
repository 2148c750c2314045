//! Terminal profiles kept in a TOML file next to the configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dc_core::config::{load_config, save_config};
use dc_core::error::ConfigError;
use dc_core::traits::TerminalProfiles;

/// A shell that can be reopened on a compute node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalProfile {
    pub node: String,
    pub host: String,
    pub command: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profiles: Vec<TerminalProfile>,
}

/// `profiles.toml` beside the config file
pub fn profiles_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
        .join("profiles.toml")
}

/// Profile registry backed by a file
#[derive(Debug, Clone)]
pub struct FileProfiles {
    path: PathBuf,
}

impl FileProfiles {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registered profiles; none when the file does not exist
    pub fn list(&self) -> Result<Vec<TerminalProfile>, ConfigError> {
        match load_config::<ProfileFile>(&self.path) {
            Ok(file) => Ok(file.profiles),
            Err(ConfigError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Vec<TerminalProfile>)) -> Result<(), ConfigError> {
        let mut profiles = self.list()?;
        f(&mut profiles);
        save_config(&self.path, &ProfileFile { profiles })
    }
}

impl TerminalProfiles for FileProfiles {
    fn register(&self, node: &str, host: &str) {
        let profile = TerminalProfile {
            node: node.to_string(),
            host: host.to_string(),
            command: format!("ssh {}", host),
        };
        let result = self.update(|profiles| {
            profiles.retain(|p| p.node != node);
            profiles.push(profile);
        });
        match result {
            Ok(()) => tracing::debug!("Registered terminal profile for {}", node),
            Err(e) => tracing::warn!("Failed to register terminal profile for {}: {}", node, e),
        }
    }

    fn unregister(&self, node: &str) {
        if let Err(e) = self.update(|profiles| profiles.retain(|p| p.node != node)) {
            tracing::warn!("Failed to remove terminal profile for {}: {}", node, e);
        }
    }
}
