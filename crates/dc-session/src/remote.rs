//! Remote commands through the local ssh client

use async_trait::async_trait;
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use dc_core::error::RemoteCommandError;
use dc_core::traits::{RemoteExec, RemoteOutput, RemoteTarget};

/// Quote a string for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@'))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r#"'\''"#))
}

/// Local command line that runs `command` on the target host
pub fn ssh_command_line(target: &RemoteTarget, command: &str) -> String {
    format!("ssh {} {}", target.host_alias, shell_quote(command))
}

/// Runs `<shell> -l -c "ssh <alias> '<command>'"` and collects its output
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRemoteExec;

#[async_trait]
impl RemoteExec for ShellRemoteExec {
    async fn run(
        &self,
        target: &RemoteTarget,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput, RemoteCommandError> {
        if cancel.is_cancelled() {
            return Err(RemoteCommandError::Aborted {
                command: command.to_string(),
            });
        }

        let line = ssh_command_line(target, command);
        tracing::debug!("Running remote command: {}", line);

        let child = Command::new(&target.shell)
            .arg("-l")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RemoteCommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        // Dropping the output future kills the child
        let output = tokio::select! {
            result = child.wait_with_output() => result.map_err(|source| RemoteCommandError::Spawn {
                command: command.to_string(),
                source,
            })?,
            _ = cancel.cancelled() => {
                tracing::debug!("Remote command aborted: {}", command);
                return Err(RemoteCommandError::Aborted { command: command.to_string() });
            }
            _ = tokio::time::sleep(target.timeout) => {
                return Err(RemoteCommandError::TimedOut {
                    command: command.to_string(),
                    timeout: target.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(RemoteCommandError::NonZeroExit {
                command: command.to_string(),
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        tracing::trace!("Remote command output: [{}]", stdout);
        Ok(RemoteOutput { stdout, stderr })
    }
}
