//! Scheduler and ssh output formats
//!
//! Every pattern scraped from redirected output lives here, so a change in
//! the scheduler's text format is a change to this file only.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use dc_core::types::{ComputeNode, QstatRecord};

use crate::watcher::Pattern;

/// Reserved name of the placeholder job
pub const TUNNEL_JOB_NAME: &str = "devconnect";

/// Queue the placeholder job is submitted to
pub const TUNNEL_QUEUE: &str = "batch";

/// Processors per node requested for the tunnel job
pub const SLOT_PPN: u32 = 2;

/// Remote placeholder script, relative to the user's home
pub const TUNNEL_SCRIPT: &str = "~/.devconnect/tunnel.sh";

/// Sink sampling interval
pub const LOG_TICK: Duration = Duration::from_secs(1);

/// Exit code ssh reports when it could not connect
pub const SSH_FAILURE_EXIT_CODE: i32 = 255;

/// Job states that no longer hold a node
const FINISHED_STATES: [&str; 2] = ["C", "E"];

fn submit_ack_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(\d+)(?:\.[\w.-]+)?\s*$").expect("valid submit regex"))
}

fn status_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // qstat -n -1: id user queue name sessid nds tsk mem time state elapsed nodes
        let pattern = format!(
            r"(?m)^\s*(\d+)(?:\.\S*)?\s+\S+\s+{}\s+{}\s+\S+\s+\S+\s+\S+\s+\S+\s+\S+\s+([A-Z])\s+\S+\s+(\S+?)(?:/\S*)?[ \t]*\r?$",
            TUNNEL_QUEUE, TUNNEL_JOB_NAME
        );
        Regex::new(&pattern).expect("valid status regex")
    })
}

fn job_listing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*Job ID\s+Username\s+Queue").expect("valid header regex"))
}

fn node_record_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(s\d{3}-n\d{3})\r?\n\s*state\s=\s(.*)\r?\n\s*power_state = \w*\r?\n\s*np = \d+\r?\n\s*properties = (.*)",
        )
        .expect("valid pbsnodes regex")
    })
}

fn job_ready_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)qsub:\s+job\s+(\S+)\s+ready").expect("valid qsub regex"))
}

/// Login prompt on the head node
pub fn head_prompt(user: &str) -> Pattern {
    Pattern::Literal(format!("{}@", user))
}

/// Shell prompt on a compute node
pub fn compute_prompt(node: &str) -> Pattern {
    Pattern::Literal(format!("@{}", node))
}

/// `qsub -I` admission notice, capturing the job id
pub fn job_ready() -> Pattern {
    Pattern::Regex(job_ready_re().clone())
}

/// Execution host in `qstat -f <job>` output, capturing the node name
pub fn exec_host(job_id: &str) -> Result<Pattern, regex::Error> {
    let re = Regex::new(&format!(
        r"Job Id:\s*{}[\s\S]*?exec_host = ([^/\s]+)/",
        regex::escape(job_id)
    ))?;
    Ok(Pattern::Regex(re))
}

/// Job id from a `qsub` acknowledgment such as `417.v-qsvr-1.aidevcloud`
pub fn parse_submit_ack(text: &str) -> Option<String> {
    submit_ack_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Outcome of scraping a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusParse {
    /// No live tunnel job listed
    NoJob,
    /// Live tunnel jobs in listing order; a node is
    /// [`ABSENT`](dc_core::types::ABSENT) until placed
    Jobs(Vec<QstatRecord>),
    /// Output that fits no known format, with its last non-empty line
    Unrecognized(String),
}

/// Scrape `qstat -n -1` output for tunnel jobs
///
/// Earlier tunnel jobs may still be listed while `qdel` catches up, so every
/// live one is returned.
pub fn parse_status(text: &str) -> StatusParse {
    if text.trim().is_empty() {
        return StatusParse::NoJob;
    }

    let jobs: Vec<QstatRecord> = status_line_re()
        .captures_iter(text)
        .filter(|caps| !FINISHED_STATES.contains(&&caps[2]))
        .map(|caps| QstatRecord {
            job_id: caps[1].to_string(),
            node_name: caps[3].to_string(),
        })
        .collect();
    if !jobs.is_empty() {
        return StatusParse::Jobs(jobs);
    }

    // A well-formed listing without a live tunnel job
    if job_listing_re().is_match(text) {
        StatusParse::NoJob
    } else {
        let last = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or_default();
        StatusParse::Unrecognized(last.to_string())
    }
}

/// Free nodes listed by `pbsnodes`
pub fn parse_free_nodes(text: &str) -> Vec<ComputeNode> {
    node_record_re()
        .captures_iter(text)
        .filter(|caps| caps[2].trim() == "free")
        .map(|caps| ComputeNode::new(&caps[1], caps[3].trim()))
        .collect()
}
