//! Interactive session launcher

use std::path::PathBuf;

use crate::error::LaunchError;
use crate::types::SessionId;

/// What to run in a new session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    /// Human-readable label, e.g. `devconnect: head node`
    pub name: String,
    /// Shell the command line is handed to
    pub shell: PathBuf,
    /// Shell command line, usually ending in a redirect to a sink
    pub command: String,
    /// Optional text shown before the command starts
    pub banner: Option<String>,
    /// Whether a human interacts with the session
    pub interactive: bool,
}

impl SessionSpec {
    /// A background session whose output goes to a sink
    pub fn service(
        name: impl Into<String>,
        shell: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            shell: shell.into(),
            command: command.into(),
            banner: None,
            interactive: false,
        }
    }

    /// A session the user types into
    pub fn interactive(
        name: impl Into<String>,
        shell: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            interactive: true,
            ..Self::service(name, shell, command)
        }
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }
}

/// Starts and manages sessions running shell commands
pub trait ProcessLauncher: Send + Sync {
    /// Start a session
    fn open(&self, spec: &SessionSpec) -> Result<SessionId, LaunchError>;

    /// Type text into a running session
    fn send_text(&self, id: SessionId, text: &str) -> Result<(), LaunchError>;

    /// Exit code if the session's process has finished
    fn exit_status(&self, id: SessionId) -> Option<i32>;

    /// Terminate a session; unknown ids are ignored
    fn dispose(&self, id: SessionId);
}
