//! dc-core: Core abstractions and configuration for devconnect
//!
//! This crate provides the shared types, error taxonomy, settings and the
//! collaborator traits used by the session orchestrator and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{Settings, ValidatedSettings};
pub use error::{
    ConfigError, ConnectError, LaunchError, PromptError, RemoteCommandError, SelectorError,
};
pub use types::{ComputeNode, ConnectionState, DeviceClass, Placement, QstatRecord, SessionId};
