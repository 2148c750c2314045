//! PBS scheduler client
//!
//! Every interaction is one remote command whose text output is scraped
//! with the formats in [`crate::patterns`].

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use dc_core::error::{ConnectError, RemoteCommandError};
use dc_core::traits::{RemoteExec, RemoteTarget};
use dc_core::types::{Placement, QstatRecord};

use crate::patterns::{self, StatusParse, SLOT_PPN, TUNNEL_JOB_NAME, TUNNEL_QUEUE, TUNNEL_SCRIPT};

/// `-l nodes=...` resource for a placement
pub fn placement_resource(placement: &Placement) -> String {
    match placement {
        Placement::AnyOf(class) => format!("nodes=1:{}:ppn={}", class.tag(), SLOT_PPN),
        Placement::Node(name) => format!("nodes={}:ppn={}", name, SLOT_PPN),
    }
}

/// Issues scheduler commands on the head node
pub struct SchedulerClient {
    remote: Arc<dyn RemoteExec>,
    target: RemoteTarget,
    user: String,
    server: String,
    walltime: Option<String>,
    last_unrecognized: Mutex<Option<String>>,
}

impl SchedulerClient {
    pub fn new(
        remote: Arc<dyn RemoteExec>,
        target: RemoteTarget,
        user: impl Into<String>,
        server: impl Into<String>,
        walltime: Option<String>,
    ) -> Self {
        Self {
            remote,
            target,
            user: user.into(),
            server: server.into(),
            walltime,
            last_unrecognized: Mutex::new(None),
        }
    }

    /// `qsub` options shared by batch and interactive submission
    fn qsub_options(&self, placement: &Placement) -> String {
        let mut options = format!("-l {}", placement_resource(placement));
        if let Some(walltime) = &self.walltime {
            options.push_str(&format!(" -l walltime={}", walltime));
        }
        options.push_str(&format!(" -N {}", TUNNEL_JOB_NAME));
        options
    }

    /// Command that submits the placeholder job to the batch queue
    pub fn submit_command(&self, placement: &Placement) -> String {
        format!(
            "mkdir -p ~/.devconnect && echo 'sleep infinity' > {script} && qsub -q {queue} {options} {script}",
            script = TUNNEL_SCRIPT,
            queue = TUNNEL_QUEUE,
            options = self.qsub_options(placement),
        )
    }

    /// Command typed into the head session for an interactive job
    pub fn interactive_command(&self, placement: &Placement) -> String {
        format!("qsub -I {}", self.qsub_options(placement))
    }

    /// Command that lists this user's jobs, one line each, with nodes
    pub fn status_command(&self) -> String {
        format!("qstat -n -1 -u {}", self.user)
    }

    /// Submit the placeholder job and return its id
    pub async fn submit_tunnel_job(
        &self,
        placement: &Placement,
        cancel: &CancellationToken,
    ) -> Result<String, ConnectError> {
        let command = self.submit_command(placement);
        tracing::info!("Submitting tunnel job for {}", placement);

        let output = self
            .remote
            .run(&self.target, &command, cancel)
            .await
            .map_err(|e| ConnectError::JobSubmissionFailed {
                reason: e.to_string(),
            })?;

        match patterns::parse_submit_ack(&output.stdout) {
            Some(job_id) => {
                tracing::info!("Tunnel job {} submitted", job_id);
                Ok(job_id)
            }
            None => Err(ConnectError::JobSubmissionFailed {
                reason: format!(
                    "unexpected qsub output: {:?} {:?}",
                    output.stdout.trim(),
                    output.stderr.trim()
                ),
            }),
        }
    }

    /// Every live tunnel job, in listing order
    pub async fn query_tunnel_jobs(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<QstatRecord>, RemoteCommandError> {
        let output = self
            .remote
            .run(&self.target, &self.status_command(), cancel)
            .await?;

        let jobs = match patterns::parse_status(&output.stdout) {
            StatusParse::NoJob => Vec::new(),
            StatusParse::Jobs(jobs) => jobs,
            StatusParse::Unrecognized(line) => {
                tracing::warn!("Unrecognized qstat output, treating as not placed: {:?}", line);
                if let Ok(mut last) = self.last_unrecognized.lock() {
                    *last = Some(line);
                }
                Vec::new()
            }
        };

        for job in &jobs {
            tracing::debug!("Tunnel job status: {} on {}", job.job_id, job.node_name);
        }
        Ok(jobs)
    }

    /// Status of one tunnel job; the absent record when it is not listed
    pub async fn query_job(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<QstatRecord, RemoteCommandError> {
        let jobs = self.query_tunnel_jobs(cancel).await?;
        Ok(jobs
            .into_iter()
            .find(|job| job.job_id == job_id)
            .unwrap_or_else(QstatRecord::absent))
    }

    /// Last status line that fit no known format
    pub fn last_unrecognized(&self) -> Option<String> {
        self.last_unrecognized.lock().ok().and_then(|last| last.clone())
    }

    /// Best-effort job cancellation; failures are only logged
    pub async fn cancel_job(&self, job_id: &str) {
        let command = format!("qdel {}", job_id);
        // Runs during teardown, after the attempt token may have fired
        let token = CancellationToken::new();

        match self.remote.run(&self.target, &command, &token).await {
            Ok(_) => tracing::info!("Cancelled tunnel job {}", job_id),
            Err(e) => tracing::warn!("Failed to cancel tunnel job {}: {}", job_id, e),
        }
    }

    /// Raw `pbsnodes` listing for the configured server
    pub async fn node_inventory(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, RemoteCommandError> {
        let command = format!("pbsnodes -s {}", self.server);
        let output = self.remote.run(&self.target, &command, cancel).await?;
        Ok(output.stdout)
    }

    /// `qstat -a` output for diagnostics, if it could be fetched
    pub async fn queue_summary(&self) -> Option<String> {
        let token = CancellationToken::new();
        match self.remote.run(&self.target, "qstat -a", &token).await {
            Ok(output) => Some(output.stdout),
            Err(e) => {
                tracing::warn!("Failed to fetch queue state: {}", e);
                None
            }
        }
    }
}
