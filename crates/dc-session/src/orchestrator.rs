//! Session orchestrator
//!
//! Drives one connection through its stages:
//!
//! ```text
//! Idle -> VerifyingFingerprint -> ConnectingHead -> SubmittingJob
//!      -> AwaitingPlacement -> ConnectingCompute -> Active -> Closing -> Idle
//! ```
//!
//! Each stage fully resolves before the next begins. A single cancellation
//! token per attempt is handed to every wait and remote call; once it fires,
//! no stage may move the session forward. Any failure before `Active` rolls
//! the attempt back: the tunnel job is cancelled, every session opened so far
//! is disposed, and the session record returns to disconnected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use dc_core::config::{SubmissionMode, ValidatedSettings};
use dc_core::error::{ConnectError, LaunchError, PromptError, SelectorError};
use dc_core::traits::{
    ProcessLauncher, Prompter, RemoteExec, SessionSpec, SettingsSource, TerminalProfiles,
};
use dc_core::types::{ConnectionState, Placement, SessionId};

use crate::monitor::{CloseReason, SessionMonitor};
use crate::patterns::{self, LOG_TICK, SSH_FAILURE_EXIT_CODE};
use crate::scheduler::SchedulerClient;
use crate::selector::ComputeNodeSelector;
use crate::session::Session;
use crate::sink::LogSink;
use crate::ssh_config;
use crate::watcher::{await_pattern, Pattern, WatchOutcome};

/// Everything the orchestrator calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsSource>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub remote: Arc<dyn RemoteExec>,
    pub prompter: Arc<dyn Prompter>,
    pub profiles: Arc<dyn TerminalProfiles>,
}

/// Owns the single cluster session of this process
pub struct SessionOrchestrator {
    collaborators: Collaborators,
    session: Session,
    state: watch::Sender<ConnectionState>,
    validated: Option<ValidatedSettings>,
    scheduler: Option<Arc<SchedulerClient>>,
    head_sink: Option<LogSink>,
}

impl SessionOrchestrator {
    pub fn new(collaborators: Collaborators) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            collaborators,
            session: Session::new(),
            state,
            validated: None,
            scheduler: None,
            head_sink: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected
    }

    fn transition(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::info!("Connection state: {} -> {}", prev, next);
        }
    }

    /// Bring up a session on a compute node
    ///
    /// Returns [`ConnectError::UserCancelled`] if `cancel` fired; callers
    /// should not report that one to the user.
    pub async fn setup_connection(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<(), ConnectError> {
        if self.session.connected {
            return Err(ConnectError::AlreadyConnected);
        }

        self.session.reset();
        let validated = self.preflight()?;
        self.validated = Some(validated.clone());

        match self.run_stages(&validated, &cancel).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let cancelled = err.is_cancelled() || cancel.is_cancelled();
                if cancelled {
                    tracing::info!("Connection attempt cancelled in state {}", self.state());
                } else {
                    tracing::warn!("Connection attempt failed in state {}: {}", self.state(), err);
                }

                self.teardown().await;
                // Teardown resets the session
                self.session.cancelled = cancelled;

                if cancelled {
                    Err(ConnectError::UserCancelled)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Load and check settings, resolve the remote user name
    fn preflight(&mut self) -> Result<ValidatedSettings, ConnectError> {
        let settings = self.collaborators.settings.load()?;
        let validated = settings.validate()?;

        let user = ssh_config::read_user(
            &validated.settings.ssh_config_path,
            &validated.settings.host_alias,
        )?;
        tracing::debug!("Remote user name: {}", user);

        self.session.remote_user_name = user;
        self.session.session_deadline = validated.session_deadline;
        Ok(validated)
    }

    async fn run_stages(
        &mut self,
        v: &ValidatedSettings,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        self.verify_fingerprint(v, cancel).await?;
        ensure_live(cancel)?;

        self.connect_head(v, cancel).await?;
        ensure_live(cancel)?;

        let node = self.submit_and_place(v, cancel).await?;
        ensure_live(cancel)?;

        self.connect_compute(v, &node, cancel).await
    }

    async fn verify_fingerprint(
        &mut self,
        v: &ValidatedSettings,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        if ssh_config::known_hosts_file_trusted(&v.settings.known_hosts_path) {
            tracing::debug!("Host keys already trusted, skipping fingerprint check");
            return Ok(());
        }

        self.transition(ConnectionState::VerifyingFingerprint);
        let sink = new_sink(v, "fingerprint")?;
        let spec = SessionSpec::interactive(
            "devconnect: head node fingerprint",
            &v.settings.shell_path,
            format!("ssh {} {}", v.head_alias(), sink.redirect()),
        )
        .with_banner(
            "To create an SSH fingerprint, type 'yes' when ssh asks to continue connecting",
        );
        let id = self.open_service(&spec)?;

        let prompt = patterns::head_prompt(&self.session.remote_user_name);
        let outcome = self
            .await_session(&sink, &prompt, v.connection_timeout, id, cancel)
            .await;
        stage_result(outcome, v.connection_timeout, |reason| {
            ConnectError::FingerprintVerificationFailed { reason }
        })?;

        // The trust store is updated; this login is not needed any more
        self.collaborators.launcher.dispose(id);
        self.session.service_sessions.retain(|s| *s != id);
        Ok(())
    }

    async fn connect_head(
        &mut self,
        v: &ValidatedSettings,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        self.transition(ConnectionState::ConnectingHead);
        let sink = new_sink(v, "head")?;
        let spec = SessionSpec::service(
            "devconnect: head node service",
            &v.settings.shell_path,
            format!("ssh {} {}", v.head_alias(), sink.redirect()),
        );
        let id = self.open_service(&spec)?;
        self.session.head_session = Some(id);

        let prompt = patterns::head_prompt(&self.session.remote_user_name);
        let outcome = self
            .await_session(&sink, &prompt, v.connection_timeout, id, cancel)
            .await;
        stage_result(outcome, v.connection_timeout, |reason| {
            ConnectError::HeadConnectFailed { reason }
        })?;

        tracing::info!("Connected to head node as {}", self.session.remote_user_name);
        self.head_sink = Some(sink);
        Ok(())
    }

    /// Submit the tunnel job and wait until it lands on a node
    async fn submit_and_place(
        &mut self,
        v: &ValidatedSettings,
        cancel: &CancellationToken,
    ) -> Result<String, ConnectError> {
        self.transition(ConnectionState::SubmittingJob);

        let scheduler = Arc::new(SchedulerClient::new(
            Arc::clone(&self.collaborators.remote),
            v.remote_target(),
            self.session.remote_user_name.clone(),
            v.scheduler_server(),
            v.walltime.clone(),
        ));
        self.scheduler = Some(Arc::clone(&scheduler));

        self.cancel_leftover_job(&scheduler, cancel).await?;

        let mut selector = ComputeNodeSelector::new();
        selector
            .refresh(&scheduler, cancel)
            .await
            .map_err(|e| selection_error(e, cancel))?;
        ensure_live(cancel)?;

        let placement = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(ConnectError::UserCancelled),
            picked = selector.select_placement(
                self.collaborators.prompter.as_ref(),
                v.settings.device_class,
            ) => {
                picked.map_err(|e| selection_error(e, cancel))?
            }
        };

        let placed = match v.settings.submission {
            SubmissionMode::Batch => self.place_batch_job(v, &scheduler, &placement, cancel).await,
            SubmissionMode::Interactive => {
                self.place_interactive_job(v, &scheduler, &placement, cancel)
                    .await
            }
        };

        match placed {
            Ok(node) => {
                tracing::info!("Tunnel job placed on {}", node);
                Ok(node)
            }
            Err(e) if cancel.is_cancelled() || e.is_cancelled() => Err(ConnectError::UserCancelled),
            Err(e) => Err(with_queue_state(&scheduler, e).await),
        }
    }

    /// Jobs left behind by earlier runs would hold the reserved name
    async fn cancel_leftover_job(
        &self,
        scheduler: &SchedulerClient,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        match scheduler.query_tunnel_jobs(cancel).await {
            Ok(jobs) => {
                for job in jobs.iter().filter(|job| job.has_job()) {
                    tracing::info!("Cancelling leftover tunnel job {}", job.job_id);
                    scheduler.cancel_job(&job.job_id).await;
                }
                Ok(())
            }
            Err(_) if cancel.is_cancelled() => Err(ConnectError::UserCancelled),
            Err(e) => {
                tracing::warn!("Could not check for a leftover tunnel job: {}", e);
                Ok(())
            }
        }
    }

    async fn place_batch_job(
        &mut self,
        v: &ValidatedSettings,
        scheduler: &SchedulerClient,
        placement: &Placement,
        cancel: &CancellationToken,
    ) -> Result<String, ConnectError> {
        let job_id = scheduler.submit_tunnel_job(placement, cancel).await?;
        self.session.tunnel_job_id = Some(job_id.clone());
        ensure_live(cancel)?;

        self.transition(ConnectionState::AwaitingPlacement);

        let poll = v.settings.placement_poll_interval.max(LOG_TICK);
        let timeout = v.settings.placement_timeout;
        let expiry = sleep(timeout);
        tokio::pin!(expiry);
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(ConnectError::UserCancelled),
                _ = &mut expiry => return Err(placement_expired(scheduler, &job_id, timeout)),
                _ = ticker.tick() => {}
            }

            // A hung status query must not outlive the placement deadline
            let query = scheduler.query_job(&job_id, cancel);
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(ConnectError::UserCancelled),
                _ = &mut expiry => return Err(placement_expired(scheduler, &job_id, timeout)),
                result = query => match result {
                    Ok(record) if record.is_placed() => return Ok(record.node_name),
                    Ok(record) => {
                        tracing::debug!("Tunnel job {} not placed yet ({})", job_id, record.node_name);
                    }
                    Err(_) if cancel.is_cancelled() => return Err(ConnectError::UserCancelled),
                    Err(e) => tracing::warn!("Tunnel job status query failed: {}", e),
                },
            }
        }
    }

    /// `qsub -I` in the head session, then `qstat -f` for the host
    async fn place_interactive_job(
        &mut self,
        v: &ValidatedSettings,
        scheduler: &SchedulerClient,
        placement: &Placement,
        cancel: &CancellationToken,
    ) -> Result<String, ConnectError> {
        let head = self.session.head_session.ok_or(ConnectError::NotConnected)?;
        let launcher = Arc::clone(&self.collaborators.launcher);

        launcher.send_text(head, "\n")?;
        launcher.send_text(head, &format!("{}\n", scheduler.interactive_command(placement)))?;

        let sink = self.head_sink.as_ref().ok_or(ConnectError::NotConnected)?;
        let outcome = await_pattern(
            sink,
            &patterns::job_ready(),
            LOG_TICK,
            v.settings.placement_timeout,
            cancel,
            fatal_exit(&launcher, head),
        )
        .await;
        let job_id = stage_result(outcome, v.settings.placement_timeout, |reason| {
            ConnectError::JobSubmissionFailed { reason }
        })?
        .ok_or_else(|| ConnectError::JobSubmissionFailed {
            reason: "job ready notice without a job id".into(),
        })?;

        tracing::info!("Interactive tunnel job {} ready", job_id);
        self.session.tunnel_job_id = Some(job_id.clone());
        self.transition(ConnectionState::AwaitingPlacement);

        launcher.send_text(head, &format!("qstat -f {}\n", job_id))?;
        let pattern = patterns::exec_host(&job_id).map_err(|e| ConnectError::PlacementTimeout {
            reason: e.to_string(),
        })?;

        let sink = self.head_sink.as_ref().ok_or(ConnectError::NotConnected)?;
        let outcome = await_pattern(
            sink,
            &pattern,
            LOG_TICK,
            v.connection_timeout,
            cancel,
            fatal_exit(&launcher, head),
        )
        .await;
        stage_result(outcome, v.connection_timeout, |reason| {
            ConnectError::PlacementTimeout { reason }
        })?
        .ok_or_else(|| ConnectError::PlacementTimeout {
            reason: format!("no execution host reported for job {}", job_id),
        })
    }

    async fn connect_compute(
        &mut self,
        v: &ValidatedSettings,
        node: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        self.transition(ConnectionState::ConnectingCompute);

        let host = v.node_host(node);
        tracing::info!("Opening tunnel to {}", host);

        let sink = new_sink(v, "compute")?;
        let spec = SessionSpec::service(
            "devconnect: compute node service",
            &v.settings.shell_path,
            format!("ssh -o StrictHostKeyChecking=no {} {}", host, sink.redirect()),
        );
        let id = self.open_service(&spec)?;
        self.session.compute_session = Some(id);

        let outcome = self
            .await_session(&sink, &patterns::compute_prompt(node), v.connection_timeout, id, cancel)
            .await;
        stage_result(outcome, v.connection_timeout, |reason| {
            ConnectError::ComputeConnectFailed { reason }
        })?;

        // A cancellation that raced the match wins
        ensure_live(cancel)?;

        self.session.connected = true;
        self.session.assigned_node_name = Some(node.to_string());
        self.session.activated_at = Some(Instant::now());
        debug_assert!(self.session.is_consistent());

        self.collaborators.profiles.register(node, &host);
        self.head_sink = None;
        self.transition(ConnectionState::Active);
        Ok(())
    }

    fn open_service(&mut self, spec: &SessionSpec) -> Result<SessionId, LaunchError> {
        let id = self.collaborators.launcher.open(spec)?;
        self.session.service_sessions.push(id);
        Ok(id)
    }

    async fn await_session(
        &self,
        sink: &LogSink,
        pattern: &Pattern,
        deadline: Duration,
        session: SessionId,
        cancel: &CancellationToken,
    ) -> WatchOutcome {
        let launcher = Arc::clone(&self.collaborators.launcher);
        let failed = fatal_exit(&launcher, session);
        await_pattern(sink, pattern, LOG_TICK, deadline, cancel, failed).await
    }

    /// Open an interactive shell on the assigned compute node
    pub fn open_work_terminal(&mut self) -> Result<SessionId, ConnectError> {
        if !self.session.connected {
            return Err(ConnectError::NotConnected);
        }
        let v = self.validated.as_ref().ok_or(ConnectError::NotConnected)?;
        let node = self
            .session
            .assigned_node_name
            .as_deref()
            .ok_or(ConnectError::NotConnected)?;

        let spec = SessionSpec::interactive(
            format!("devconnect work: {}", node),
            &v.settings.shell_path,
            format!("ssh {}", v.node_host(node)),
        );
        let id = self.collaborators.launcher.open(&spec)?;
        self.session.work_sessions.push(id);
        Ok(id)
    }

    /// Watch the active session until it has to end, then close it
    ///
    /// Cancelling `shutdown` is an explicit close request.
    pub async fn supervise(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<CloseReason, ConnectError> {
        if !self.session.connected {
            return Err(ConnectError::NotConnected);
        }
        let timeout = self
            .validated
            .as_ref()
            .map(|v| v.connection_timeout)
            .ok_or(ConnectError::NotConnected)?;

        let monitor = SessionMonitor::new(
            self.session.activated_at.unwrap_or_else(Instant::now),
            self.session.session_deadline,
            timeout,
        );

        let launcher = Arc::clone(&self.collaborators.launcher);
        let head = self.session.head_session;
        let compute = self.session.compute_session;
        let exited =
            |id: Option<SessionId>| id.is_some_and(|id| launcher.exit_status(id).is_some());

        let reason = monitor
            .watch(
                || {
                    if exited(head) {
                        Some(CloseReason::HeadSessionLost)
                    } else if exited(compute) {
                        Some(CloseReason::ComputeSessionLost)
                    } else {
                        None
                    }
                },
                shutdown,
            )
            .await;

        tracing::info!("Closing connection: {}", reason);
        self.close_connection().await?;
        Ok(reason)
    }

    /// Cancel the tunnel job and dispose every session of this connection
    pub async fn close_connection(&mut self) -> Result<(), ConnectError> {
        if !self.session.connected {
            return Err(ConnectError::NotConnected);
        }
        self.transition(ConnectionState::Closing);
        self.teardown().await;
        Ok(())
    }

    /// Best-effort cleanup shared by rollback and close; never fails
    async fn teardown(&mut self) {
        if let Some(job_id) = self.session.tunnel_job_id.take() {
            match &self.scheduler {
                Some(scheduler) => scheduler.cancel_job(&job_id).await,
                None => tracing::warn!("No scheduler to cancel tunnel job {}", job_id),
            }
        }

        for id in self.session.all_sessions() {
            self.collaborators.launcher.dispose(id);
        }

        if self.session.connected {
            if let Some(node) = &self.session.assigned_node_name {
                self.collaborators.profiles.unregister(node);
            }
        }

        self.head_sink = None;
        self.scheduler = None;
        self.session.reset();
        self.transition(ConnectionState::Idle);
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), ConnectError> {
    if cancel.is_cancelled() {
        Err(ConnectError::UserCancelled)
    } else {
        Ok(())
    }
}

fn new_sink(v: &ValidatedSettings, stage: &str) -> Result<LogSink, ConnectError> {
    LogSink::create(&v.settings.sink_dir, stage)
        .map_err(|e| ConnectError::Launch(LaunchError::Io(e)))
}

fn fatal_exit(launcher: &Arc<dyn ProcessLauncher>, id: SessionId) -> impl Fn() -> bool {
    let launcher = Arc::clone(launcher);
    move || launcher.exit_status(id) == Some(SSH_FAILURE_EXIT_CODE)
}

fn stage_result(
    outcome: WatchOutcome,
    deadline: Duration,
    fail: impl FnOnce(String) -> ConnectError,
) -> Result<Option<String>, ConnectError> {
    match outcome {
        WatchOutcome::Matched(capture) => Ok(capture),
        WatchOutcome::Cancelled => Err(ConnectError::UserCancelled),
        WatchOutcome::TimedOut => Err(fail(format!("no response within {:?}", deadline))),
        WatchOutcome::ExternalFailure => Err(fail(format!(
            "ssh exited with code {}",
            SSH_FAILURE_EXIT_CODE
        ))),
    }
}

fn selection_error(err: SelectorError, cancel: &CancellationToken) -> ConnectError {
    if cancel.is_cancelled() || matches!(err, SelectorError::Prompt(PromptError::Closed)) {
        ConnectError::UserCancelled
    } else {
        ConnectError::NodeSelection(err)
    }
}

fn placement_expired(
    scheduler: &SchedulerClient,
    job_id: &str,
    timeout: Duration,
) -> ConnectError {
    let mut reason = format!("job {} was not placed within {:?}", job_id, timeout);
    if let Some(line) = scheduler.last_unrecognized() {
        reason.push_str(&format!(" (last unrecognized status: {})", line));
    }
    ConnectError::PlacementTimeout { reason }
}

/// Attach `qstat -a` output to submission and placement failures
async fn with_queue_state(scheduler: &SchedulerClient, err: ConnectError) -> ConnectError {
    let attach = |reason: String, summary: &str| {
        format!("{}\n\nQueue state:\n{}", reason, summary.trim_end())
    };

    match err {
        ConnectError::JobSubmissionFailed { reason } => match scheduler.queue_summary().await {
            Some(summary) => ConnectError::JobSubmissionFailed {
                reason: attach(reason, &summary),
            },
            None => ConnectError::JobSubmissionFailed { reason },
        },
        ConnectError::PlacementTimeout { reason } => match scheduler.queue_summary().await {
            Some(summary) => ConnectError::PlacementTimeout {
                reason: attach(reason, &summary),
            },
            None => ConnectError::PlacementTimeout { reason },
        },
        other => other,
    }
}
