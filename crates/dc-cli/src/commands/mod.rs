//! CLI command implementations

mod config;
mod connect;
mod nodes;
mod status;

pub use config::{config_get, config_init, config_path, config_set, config_show};
pub use connect::connect_command;
pub use nodes::nodes_command;
pub use status::status_command;
