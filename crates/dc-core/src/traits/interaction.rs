//! User-facing collaborators

use async_trait::async_trait;

use crate::config::Settings;
use crate::error::{ConfigError, PromptError};

/// Asks the user to pick one entry from a list
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Returns the index of the chosen entry; may wait indefinitely
    async fn choose(
        &self,
        title: &str,
        choices: &[String],
        default: Option<usize>,
    ) -> Result<usize, PromptError>;
}

/// Registry of reusable terminal profiles bound to a compute node
pub trait TerminalProfiles: Send + Sync {
    fn register(&self, node: &str, host: &str);

    fn unregister(&self, node: &str);
}

/// Provides fresh settings at the start of every attempt
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<Settings, ConfigError>;
}

impl SettingsSource for Settings {
    fn load(&self) -> Result<Settings, ConfigError> {
        Ok(self.clone())
    }
}
