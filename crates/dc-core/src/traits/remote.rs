//! One-shot remote command execution

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::RemoteCommandError;

/// Where and how remote commands are run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Local shell that runs ssh
    pub shell: PathBuf,
    /// SSH host alias of the head node
    pub host_alias: String,
    /// Upper bound for a single command
    pub timeout: Duration,
}

/// Captured output of a finished remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            stderr: String::new(),
        }
    }
}

/// Runs a command on the head node and waits for it to finish
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` on `target`; resolves to `Aborted` once `cancel` fires
    async fn run(
        &self,
        target: &RemoteTarget,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput, RemoteCommandError>;
}
