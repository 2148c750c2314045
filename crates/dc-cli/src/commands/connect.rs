//! Connect command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dc_core::config::FileSettings;
use dc_core::types::ConnectionState;
use dc_session::{Collaborators, PtyLauncher, SessionOrchestrator, ShellRemoteExec};

use crate::output::{
    describe_state, format_duration, print_error, print_info, print_success, print_warning,
};
use crate::profiles::{profiles_path, FileProfiles};
use crate::prompt::StdinPrompter;

/// Execute the connect command
///
/// Ctrl+C aborts a connection attempt silently; once connected it closes
/// the connection.
pub async fn connect_command(config_path: &Path, open_terminal: bool) -> Result<()> {
    let mut orchestrator = SessionOrchestrator::new(Collaborators {
        settings: Arc::new(FileSettings::new(config_path)),
        launcher: Arc::new(PtyLauncher::new()),
        remote: Arc::new(ShellRemoteExec),
        prompter: Arc::new(StdinPrompter),
        profiles: Arc::new(FileProfiles::new(profiles_path(config_path))),
    });

    let interrupt = CancellationToken::new();
    let ctrl_c = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("Interrupt received");
                interrupt.cancel();
            }
        })
    };

    let mut states = orchestrator.subscribe();
    let progress = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if !matches!(state, ConnectionState::Active | ConnectionState::Idle) {
                print_info(describe_state(state));
            }
        }
    });

    let result = orchestrator.setup_connection(interrupt.clone()).await;
    if let Err(e) = result {
        progress.abort();
        ctrl_c.abort();

        if e.is_cancelled() {
            tracing::debug!("Connection attempt cancelled");
            return Ok(());
        }
        print_error(&e.to_string());
        if let Some(hints) = e.guidance() {
            eprintln!("{}", hints);
        }
        return Err(e.into());
    }

    let node = orchestrator
        .session()
        .assigned_node_name
        .clone()
        .unwrap_or_default();
    print_success(&format!("Connected to compute node {}", node));

    if open_terminal {
        if let Err(e) = orchestrator.open_work_terminal() {
            print_warning(&format!("Failed to open a terminal on {}: {}", node, e));
        }
    } else {
        print_info("Run 'devconnect status' for the command that opens a shell there");
    }
    print_info("Press Ctrl+C to close the connection");

    let started = Instant::now();
    let reason = orchestrator.supervise(&interrupt).await;
    progress.abort();
    ctrl_c.abort();

    let reason = reason?;
    print_success(&format!(
        "Connection closed after {}: {}",
        format_duration(started.elapsed().as_secs()),
        reason
    ));
    Ok(())
}
