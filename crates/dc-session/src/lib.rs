//! dc-session: drives an interactive session on a PBS cluster
//!
//! The orchestrator logs into the head node over ssh, submits a placeholder
//! job that reserves a compute node, waits for the scheduler to place it and
//! then opens a tunnel to that node. Everything it learns about the remote
//! side is scraped from text: the output of remote commands and the log
//! files that ssh sessions are redirected into.

pub mod launcher;
pub mod monitor;
pub mod orchestrator;
pub mod patterns;
pub mod remote;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod sink;
pub mod ssh_config;
pub mod watcher;

pub use launcher::PtyLauncher;
pub use monitor::{CloseReason, SessionMonitor};
pub use orchestrator::{Collaborators, SessionOrchestrator};
pub use remote::ShellRemoteExec;
pub use scheduler::SchedulerClient;
pub use selector::ComputeNodeSelector;
pub use session::Session;
