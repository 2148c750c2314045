//! Output formatting utilities for the CLI
//!
//! Tables for node inventories and terminal profiles, progress lines for
//! connection states, and colored status messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use dc_core::types::{ComputeNode, ConnectionState};

use crate::profiles::TerminalProfile;

/// Format free compute nodes as a table
pub fn format_nodes(nodes: &[ComputeNode]) -> String {
    if nodes.is_empty() {
        return "No free compute nodes".to_string();
    }

    #[derive(Tabled)]
    struct NodeRow {
        #[tabled(rename = "NODE")]
        name: String,
        #[tabled(rename = "CLASSES")]
        classes: String,
        #[tabled(rename = "PROPERTIES")]
        properties: String,
    }

    let rows: Vec<NodeRow> = nodes
        .iter()
        .map(|n| NodeRow {
            name: n.name.clone(),
            classes: {
                let classes: Vec<String> = n.device_classes().map(|c| c.to_string()).collect();
                if classes.is_empty() {
                    "-".to_string()
                } else {
                    classes.join(", ")
                }
            },
            properties: truncate(&n.properties(), 60),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(100))
        .to_string()
}

/// Format registered terminal profiles as a table
pub fn format_profiles(profiles: &[TerminalProfile]) -> String {
    if profiles.is_empty() {
        return "No active compute node session".to_string();
    }

    #[derive(Tabled)]
    struct ProfileRow {
        #[tabled(rename = "NODE")]
        node: String,
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "COMMAND")]
        command: String,
    }

    let rows: Vec<ProfileRow> = profiles
        .iter()
        .map(|p| ProfileRow {
            node: p.node.clone(),
            host: p.host.clone(),
            command: p.command.clone(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Progress line shown when the connection enters `state`
pub fn describe_state(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "Disconnected",
        ConnectionState::VerifyingFingerprint => "Checking the head node fingerprint...",
        ConnectionState::ConnectingHead => "Connecting to the head node...",
        ConnectionState::SubmittingJob => "Submitting the tunnel job...",
        ConnectionState::AwaitingPlacement => "Waiting for a compute node...",
        ConnectionState::ConnectingCompute => "Connecting to the compute node...",
        ConnectionState::Active => "Connected",
        ConnectionState::Closing => "Closing the connection...",
    }
}

/// Format duration in human-readable form
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
