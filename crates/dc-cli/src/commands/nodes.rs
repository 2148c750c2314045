//! Nodes command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use dc_core::config::FileSettings;
use dc_core::error::SelectorError;
use dc_core::traits::SettingsSource;
use dc_session::{ssh_config, ComputeNodeSelector, SchedulerClient, ShellRemoteExec};

use crate::output::{format_nodes, print_info, print_warning};

/// List free compute nodes without connecting
pub async fn nodes_command(config_path: &Path) -> Result<()> {
    let settings = FileSettings::new(config_path).load()?.validate()?;
    let user = ssh_config::read_user(
        &settings.settings.ssh_config_path,
        &settings.settings.host_alias,
    )?;

    let scheduler = SchedulerClient::new(
        Arc::new(ShellRemoteExec),
        settings.remote_target(),
        user,
        settings.scheduler_server(),
        settings.walltime.clone(),
    );

    print_info(&format!(
        "Querying free nodes on {}...",
        settings.scheduler_server()
    ));

    let mut selector = ComputeNodeSelector::new();
    match selector.refresh(&scheduler, &CancellationToken::new()).await {
        Ok(()) => {}
        Err(SelectorError::NoFreeNodes) => {
            print_warning("There are no free compute nodes right now");
            return Ok(());
        }
        Err(SelectorError::NoKnownDeviceClasses) => {
            print_warning("No free node carries a known device class");
        }
        Err(e) => return Err(e).context("Failed to query the node inventory"),
    }

    println!("{}", format_nodes(selector.nodes()));
    Ok(())
}
