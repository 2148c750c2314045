//! Capabilities the connection core calls into

mod interaction;
mod launcher;
mod remote;

pub use interaction::{Prompter, SettingsSource, TerminalProfiles};
pub use launcher::{ProcessLauncher, SessionSpec};
pub use remote::{RemoteExec, RemoteOutput, RemoteTarget};
