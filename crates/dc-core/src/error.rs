//! Error types for devconnect

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{DeviceClass, SessionId};

const CONNECTIVITY_HINTS: &str = "Possible fixes:\n\
    * Check your VPN status. Disconnect from any active VPN connections.\n\
    * Check the proxy settings in the configuration file.\n\
    * Check your Internet connection.\n\
    * Try to increase connection_timeout in the configuration file.";

const JOB_HINTS: &str = "Possible reasons:\n\
    * There is no free node with the requested device class. Try another device class.\n\
    * The job is still waiting in the scheduler queue. Check the queue state below.\n\
    * Try to increase placement_timeout in the configuration file.";

const COMPUTE_HINTS: &str = "Possible fixes:\n\
    * Increase connection_timeout in the configuration file.\n\
    * Try to choose another device class or compute node.";

/// Error surfaced by `setup_connection` and friends
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Settings failed pre-flight validation
    #[error("Configuration error: {0}")]
    ConfigurationInvalid(#[from] ConfigError),

    /// A session is already active
    #[error("Already connected. Close the current connection first")]
    AlreadyConnected,

    /// An operation needed an active session
    #[error("There is no active connection to the cluster")]
    NotConnected,

    /// Host key acceptance did not complete
    #[error("Failed to create an SSH fingerprint: {reason}")]
    FingerprintVerificationFailed { reason: String },

    /// Head node login was not observed
    #[error("Failed to connect to head node: {reason}")]
    HeadConnectFailed { reason: String },

    /// Tunnel job could not be submitted
    #[error("Failed to create tunnel job: {reason}")]
    JobSubmissionFailed { reason: String },

    /// The tunnel job never reached a compute node
    #[error("Tunnel job was not placed on a compute node: {reason}")]
    PlacementTimeout { reason: String },

    /// Compute node prompt was not observed
    #[error("Failed to create tunnel to compute node: {reason}")]
    ComputeConnectFailed { reason: String },

    /// The attempt was cancelled by the user
    #[error("Cancelled by user")]
    UserCancelled,

    /// A remote command failed outside of a stage-specific context
    #[error("Remote command error: {0}")]
    RemoteCommand(#[from] RemoteCommandError),

    /// A local session could not be started
    #[error("Failed to launch session: {0}")]
    Launch(#[from] LaunchError),

    /// Compute node inventory or choice failed
    #[error("Compute node selection failed: {0}")]
    NodeSelection(#[from] SelectorError),
}

impl ConnectError {
    /// Whether this error is the silent user-cancellation case
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConnectError::UserCancelled)
    }

    /// Actionable hints bundled with stage failures
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            ConnectError::FingerprintVerificationFailed { .. }
            | ConnectError::HeadConnectFailed { .. }
            | ConnectError::RemoteCommand(_) => Some(CONNECTIVITY_HINTS),
            ConnectError::JobSubmissionFailed { .. }
            | ConnectError::PlacementTimeout { .. }
            | ConnectError::NodeSelection(_) => Some(JOB_HINTS),
            ConnectError::ComputeConnectFailed { .. } => Some(COMPUTE_HINTS),
            _ => None,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Wall time is not `hh:mm:ss` with integer parts
    #[error("Invalid session wall time {0:?}. Use the following format: hh:mm:ss")]
    WallTimeFormat(String),

    /// Wall time parts are out of range
    #[error(
        "Invalid session wall time {0:?}. mm and ss take values from 0 to 59, hh from 0 to 24, \
         and the only valid entry for hh = 24 is 24:00:00"
    )]
    WallTimeValue(String),

    /// Wall time leaves no room for the connection stages
    #[error("Session wall time {walltime:?} must be more than {min_secs} sec")]
    WallTimeTooShort { walltime: String, min_secs: u64 },

    /// Proxy enabled without a server
    #[error("The proxy option is enabled, but proxy_server is not specified")]
    ProxyServerMissing,

    /// Proxy server is not a URL or host:port
    #[error("The proxy server value {0:?} is invalid")]
    ProxyServerInvalid(String),

    /// SSH client configuration file is absent
    #[error("Could not find the SSH configuration file at {0:?}")]
    SshConfigMissing(PathBuf),

    /// SSH client configuration has no usable entry for the head node alias
    #[error("SSH config {path:?} does not contain a \"{alias}\" host alias with a User field")]
    HostAliasMissing { alias: String, path: PathBuf },
}

/// Failure of a one-shot remote command
#[derive(Error, Debug)]
pub enum RemoteCommandError {
    /// The local shell could not be started
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command finished unsuccessfully
    #[error("`{command}` exited with code {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The attempt was cancelled while the command was running
    #[error("`{command}` aborted")]
    Aborted { command: String },

    /// The command did not finish in time
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Errors from the process launcher
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The session process could not be started
    #[error("failed to start session '{name}': {reason}")]
    Spawn { name: String, reason: String },

    /// No such session
    #[error("session {0} not found")]
    UnknownSession(SessionId),

    /// I/O error while talking to the session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the compute node selector
#[derive(Error, Debug)]
pub enum SelectorError {
    /// Inventory listed no free node
    #[error("no free compute nodes reported by the scheduler")]
    NoFreeNodes,

    /// Free nodes exist but none carries a known device class
    #[error("free compute nodes carry no known device class")]
    NoKnownDeviceClasses,

    /// Chosen class has no free node
    #[error("no free compute node of class {0}")]
    NoNodesInClass(DeviceClass),

    /// Inventory query failed
    #[error("inventory query failed: {0}")]
    Inventory(#[from] RemoteCommandError),

    /// User prompt failed
    #[error("prompt failed: {0}")]
    Prompt(#[from] PromptError),
}

/// Errors from an interactive prompt
#[derive(Error, Debug)]
pub enum PromptError {
    /// Input was closed before a choice arrived
    #[error("input closed before a choice was made")]
    Closed,

    /// Nothing to choose from
    #[error("no choices offered")]
    NoChoices,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
