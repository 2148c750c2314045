//! dc-cli: command-line front end for devconnect
//!
//! Provides the `devconnect` binary that reserves a compute node on the
//! cluster and keeps a tunnel to it open.

pub mod commands;
pub mod output;
pub mod profiles;
pub mod prompt;
