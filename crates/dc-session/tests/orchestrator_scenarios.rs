//! Orchestrator scenarios
//!
//! Drives full connection attempts against a fake launcher that writes
//! scripted prompts into the sinks, and a fake head node that answers
//! scheduler commands from a script.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dc_core::config::{Settings, SubmissionMode};
use dc_core::error::{ConnectError, LaunchError, PromptError, RemoteCommandError};
use dc_core::traits::{
    ProcessLauncher, Prompter, RemoteExec, RemoteOutput, RemoteTarget, SessionSpec,
    TerminalProfiles,
};
use dc_core::types::{ConnectionState, SessionId};
use dc_session::ssh_config::{GATEWAY_HOST_KEYS, HEAD_NODE_HOST_KEYS};
use dc_session::{CloseReason, Collaborators, SessionOrchestrator};

const INVENTORY: &str = "\
s001-n042
     state = free
     power_state = Running
     np = 2
     properties = xeon,skl,gold6128,ram192gb,net1gbe
s001-n043
     state = free
     power_state = Running
     np = 2
     properties = xeon,skl,gold6128,ram192gb,net1gbe,gpu,gen9
";

const HEADER: &str = "\nv-qsvr-1.aidevcloud:\n\
    Job ID                  Username    Queue    Jobname          SessID  NDS   TSK   Memory      Time    S   Time\n\
    ----------------------- ----------- -------- ---------------- ------ ----- ------ --------- --------- - ---------\n";

fn queued() -> String {
    format!(
        "{}417.v-qsvr-1.aidevclou  alice       batch    devconnect          --      1      2       --   06:00:00 Q       --    --\n",
        HEADER
    )
}

fn placed() -> String {
    format!(
        "{}417.v-qsvr-1.aidevclou  alice       batch    devconnect       12345      1      2       --   06:00:00 R  00:00:05   s001-n042/0-1\n",
        HEADER
    )
}

/// A tunnel job from an earlier run still holding a node
const STALE_JOB: &str =
    "399.v-qsvr-1.aidevclou  alice       batch    devconnect       11111      1      2       --   06:00:00 R  01:10:00   s001-n001/0-1\n";

fn stale() -> String {
    format!("{}{}", HEADER, STALE_JOB)
}

/// The stale job is listed ahead of the new one until `qdel` catches up
fn stale_then(listing: String) -> String {
    listing.replacen(HEADER, &stale(), 1)
}

/// Launches nothing; writes the prompt ssh would have produced
#[derive(Default)]
struct FakeLauncher {
    next_id: AtomicU64,
    silent_head: bool,
    opened: Mutex<Vec<(SessionId, SessionSpec)>>,
    disposed: Mutex<Vec<SessionId>>,
    sinks: Mutex<HashMap<SessionId, PathBuf>>,
    exits: Mutex<HashMap<SessionId, i32>>,
    sent: Mutex<Vec<String>>,
}

impl FakeLauncher {
    fn silent_head() -> Self {
        Self {
            silent_head: true,
            ..Default::default()
        }
    }

    fn opened(&self) -> Vec<(SessionId, SessionSpec)> {
        self.opened.lock().unwrap().clone()
    }

    fn disposed(&self) -> Vec<SessionId> {
        self.disposed.lock().unwrap().clone()
    }

    fn exit(&self, id: SessionId, code: i32) {
        self.exits.lock().unwrap().insert(id, code);
    }

    /// Every opened session was disposed
    fn all_disposed(&self) -> bool {
        let disposed = self.disposed();
        self.opened()
            .iter()
            .all(|(id, _)| disposed.contains(id))
    }
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

impl ProcessLauncher for FakeLauncher {
    fn open(&self, spec: &SessionSpec) -> Result<SessionId, LaunchError> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.opened.lock().unwrap().push((id, spec.clone()));

        if let Some((_, target)) = spec.command.split_once("> ") {
            let sink = PathBuf::from(target.trim().trim_matches('\''));
            let compute = spec
                .command
                .split_once("StrictHostKeyChecking=no ")
                .and_then(|(_, rest)| rest.split('.').next());

            match compute {
                Some(node) => append(&sink, &format!("[alice@{} ~]$ ", node)),
                None if !self.silent_head => append(&sink, "[alice@login-2 ~]$ "),
                None => {}
            }
            self.sinks.lock().unwrap().insert(id, sink);
        }
        Ok(id)
    }

    fn send_text(&self, id: SessionId, text: &str) -> Result<(), LaunchError> {
        self.sent.lock().unwrap().push(text.to_string());
        let sink = self
            .sinks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(LaunchError::UnknownSession(id))?;

        if text.starts_with("qsub -I") {
            append(
                &sink,
                "qsub: waiting for job 418.v-qsvr-1.aidevcloud to start\n\
                 qsub: job 418.v-qsvr-1.aidevcloud ready\n\n[alice@s001-n042 ~]$ ",
            );
        } else if text.starts_with("qstat -f 418.v-qsvr-1.aidevcloud") {
            append(
                &sink,
                "Job Id: 418.v-qsvr-1.aidevcloud\n    Job_Name = STDIN\n    exec_host = s001-n042/0-1\n",
            );
        }
        Ok(())
    }

    fn exit_status(&self, id: SessionId) -> Option<i32> {
        self.exits.lock().unwrap().get(&id).copied()
    }

    fn dispose(&self, id: SessionId) {
        self.disposed.lock().unwrap().push(id);
    }
}

/// Head node answering scheduler commands from a script
struct FakeRemote {
    statuses: Mutex<VecDeque<String>>,
    status_delay: Mutex<Option<Duration>>,
    commands: Mutex<Vec<String>>,
}

impl FakeRemote {
    /// The last status stays in place once the script runs out
    fn new(statuses: &[String]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().cloned().collect()),
            status_delay: Mutex::new(None),
            commands: Mutex::new(Vec::new()),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Later status queries hang for `delay`
    fn stall_status(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    fn next_status(&self) -> String {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or_default()
        } else {
            statuses.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl RemoteExec for FakeRemote {
    async fn run(
        &self,
        _target: &RemoteTarget,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput, RemoteCommandError> {
        if cancel.is_cancelled() {
            return Err(RemoteCommandError::Aborted {
                command: command.to_string(),
            });
        }
        self.commands.lock().unwrap().push(command.to_string());

        if command.starts_with("qstat -n -1") {
            let delay = *self.status_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        let stdout = if command.starts_with("pbsnodes") {
            INVENTORY.to_string()
        } else if command.contains("qsub") {
            "417.v-qsvr-1.aidevcloud\n".to_string()
        } else if command.starts_with("qstat -n -1") {
            self.next_status()
        } else if command.starts_with("qstat -a") {
            format!("{}(queue summary)\n", HEADER)
        } else {
            String::new()
        };
        Ok(RemoteOutput::stdout(stdout))
    }
}

/// Picks the first device class and any node of it
struct FirstChoice;

#[async_trait]
impl Prompter for FirstChoice {
    async fn choose(
        &self,
        _title: &str,
        _choices: &[String],
        _default: Option<usize>,
    ) -> Result<usize, PromptError> {
        Ok(0)
    }
}

/// Never answers, like a user staring at the picker
struct PendingChoice;

#[async_trait]
impl Prompter for PendingChoice {
    async fn choose(
        &self,
        _title: &str,
        _choices: &[String],
        _default: Option<usize>,
    ) -> Result<usize, PromptError> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct RecordingProfiles {
    registered: Mutex<Vec<(String, String)>>,
    unregistered: Mutex<Vec<String>>,
}

impl TerminalProfiles for RecordingProfiles {
    fn register(&self, node: &str, host: &str) {
        self.registered
            .lock()
            .unwrap()
            .push((node.to_string(), host.to_string()));
    }

    fn unregister(&self, node: &str) {
        self.unregistered.lock().unwrap().push(node.to_string());
    }
}

struct Harness {
    _dir: TempDir,
    settings: Settings,
    launcher: Arc<FakeLauncher>,
    remote: Arc<FakeRemote>,
    profiles: Arc<RecordingProfiles>,
}

impl Harness {
    fn new(launcher: FakeLauncher, statuses: &[String]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ssh_config = dir.path().join("config");
        std::fs::write(
            &ssh_config,
            "Host devcloud\n    User alice\n    ProxyCommand ssh -T -i ~/.ssh/devcloud-access-key guest@devcloud.example\n",
        )
        .unwrap();
        let known_hosts = dir.path().join("known_hosts");
        std::fs::write(
            &known_hosts,
            format!("{}\n{}\n", GATEWAY_HOST_KEYS[0], HEAD_NODE_HOST_KEYS[0]),
        )
        .unwrap();

        let settings = Settings {
            ssh_config_path: ssh_config,
            known_hosts_path: known_hosts,
            sink_dir: dir.path().to_path_buf(),
            session_walltime: Some("00:05:00".into()),
            ..Settings::default()
        };

        Self {
            _dir: dir,
            settings,
            launcher: Arc::new(launcher),
            remote: Arc::new(FakeRemote::new(statuses)),
            profiles: Arc::new(RecordingProfiles::default()),
        }
    }

    fn orchestrator(&self) -> SessionOrchestrator {
        self.orchestrator_with(Arc::new(FirstChoice))
    }

    fn orchestrator_with(&self, prompter: Arc<dyn Prompter>) -> SessionOrchestrator {
        SessionOrchestrator::new(Collaborators {
            settings: Arc::new(self.settings.clone()),
            launcher: self.launcher.clone(),
            remote: self.remote.clone(),
            prompter,
            profiles: self.profiles.clone(),
        })
    }
}

fn happy_statuses() -> Vec<String> {
    vec![String::new(), queued(), queued(), placed()]
}

#[tokio::test(start_paused = true)]
async fn test_queued_then_placed_becomes_active() {
    let harness = Harness::new(FakeLauncher::default(), &happy_statuses());
    let mut orchestrator = harness.orchestrator();

    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(orchestrator.state(), ConnectionState::Active);
    let session = orchestrator.session();
    assert!(session.connected);
    assert!(session.is_consistent());
    assert_eq!(session.assigned_node_name.as_deref(), Some("s001-n042"));
    assert_eq!(session.tunnel_job_id.as_deref(), Some("417"));
    assert_eq!(session.remote_user_name, "alice");

    // Head service session plus compute tunnel, fingerprint already trusted
    let opened = harness.launcher.opened();
    assert_eq!(opened.len(), 2);
    assert!(opened.iter().all(|(_, spec)| !spec.interactive));
    assert!(opened[1].1.command.contains("s001-n042.aidevcloud"));

    let submit = harness
        .remote
        .commands()
        .into_iter()
        .find(|c| c.contains("qsub"))
        .unwrap();
    assert!(submit.contains("-l nodes=1:xeon:ppn=2"));
    assert!(submit.contains("-l walltime=00:05:00"));
    assert!(submit.contains("-N devconnect"));

    assert_eq!(
        *harness.profiles.registered.lock().unwrap(),
        vec![("s001-n042".to_string(), "s001-n042.aidevcloud".to_string())]
    );
    assert_eq!(harness.remote.count("qdel"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_untrusted_host_keys_run_fingerprint_stage() {
    let harness = Harness::new(FakeLauncher::default(), &happy_statuses());
    std::fs::remove_file(&harness.settings.known_hosts_path).unwrap();
    let mut orchestrator = harness.orchestrator();

    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();

    let opened = harness.launcher.opened();
    assert_eq!(opened.len(), 3);
    let (fingerprint, spec) = &opened[0];
    assert!(spec.interactive);
    assert!(spec.banner.is_some());
    // Closed as soon as the head node answered
    assert_eq!(harness.launcher.disposed(), vec![*fingerprint]);
    assert_eq!(orchestrator.state(), ConnectionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_awaiting_placement_rolls_back() {
    let harness = Harness::new(FakeLauncher::default(), &[String::new(), queued()]);
    let mut orchestrator = harness.orchestrator();
    let mut states = orchestrator.subscribe();
    let token = CancellationToken::new();

    let (result, _) = tokio::join!(orchestrator.setup_connection(token.clone()), async {
        states
            .wait_for(|s| *s == ConnectionState::AwaitingPlacement)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(7)).await;
        token.cancel();
    });

    assert!(matches!(result, Err(ConnectError::UserCancelled)));
    assert_eq!(harness.remote.count("qdel 417"), 1);
    assert!(harness.launcher.all_disposed());
    assert!(!orchestrator.is_connected());
    assert!(orchestrator.session().cancelled);
    assert_eq!(orchestrator.state(), ConnectionState::Idle);
    assert!(harness.profiles.registered.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_node_selection_submits_nothing() {
    let harness = Harness::new(FakeLauncher::default(), &happy_statuses());
    let mut orchestrator = harness.orchestrator_with(Arc::new(PendingChoice));
    let mut states = orchestrator.subscribe();
    let token = CancellationToken::new();

    let (result, _) = tokio::join!(orchestrator.setup_connection(token.clone()), async {
        states
            .wait_for(|s| *s == ConnectionState::SubmittingJob)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
    });

    assert!(matches!(result, Err(ConnectError::UserCancelled)));
    assert_eq!(harness.remote.count("pbsnodes"), 1);
    assert_eq!(harness.remote.count("qsub"), 0);
    assert_eq!(harness.remote.count("qdel"), 0);
    assert!(harness.launcher.all_disposed());
    assert!(orchestrator.session().cancelled);
    assert!(orchestrator.session().tunnel_job_id.is_none());
    assert_eq!(orchestrator.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_stale_tunnel_job_does_not_hide_placement() {
    let harness = Harness::new(
        FakeLauncher::default(),
        &[stale(), stale_then(queued()), stale_then(placed())],
    );
    let mut orchestrator = harness.orchestrator();

    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(orchestrator.state(), ConnectionState::Active);
    let session = orchestrator.session();
    assert_eq!(session.tunnel_job_id.as_deref(), Some("417"));
    assert_eq!(session.assigned_node_name.as_deref(), Some("s001-n042"));
    assert_eq!(harness.remote.count("qdel 399"), 1);
    assert_eq!(harness.remote.count("qdel 417"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_status_query_still_times_out() {
    let mut harness = Harness::new(FakeLauncher::default(), &[String::new(), queued()]);
    harness.settings.placement_timeout = Duration::from_secs(20);
    let mut orchestrator = harness.orchestrator();
    let mut states = orchestrator.subscribe();
    let remote = harness.remote.clone();

    let (result, awaiting_since) = tokio::join!(
        orchestrator.setup_connection(CancellationToken::new()),
        async {
            states
                .wait_for(|s| *s == ConnectionState::AwaitingPlacement)
                .await
                .unwrap();
            remote.stall_status(Duration::from_secs(3600));
            Instant::now()
        }
    );

    assert!(matches!(result, Err(ConnectError::PlacementTimeout { .. })));
    assert!(awaiting_since.elapsed() < Duration::from_secs(60));
    assert_eq!(harness.remote.count("qdel 417"), 1);
    assert!(harness.launcher.all_disposed());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_proxy_fails_before_any_side_effect() {
    let mut harness = Harness::new(FakeLauncher::default(), &happy_statuses());
    harness.settings.proxy = true;
    harness.settings.proxy_server = Some("not a proxy".into());
    let mut orchestrator = harness.orchestrator();

    let err = orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectError::ConfigurationInvalid(_)));
    assert!(harness.launcher.opened().is_empty());
    assert!(harness.remote.commands().is_empty());
    assert_eq!(orchestrator.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_silent_head_node_times_out() {
    let harness = Harness::new(FakeLauncher::silent_head(), &happy_statuses());
    let mut orchestrator = harness.orchestrator();
    let started = Instant::now();

    let err = orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectError::HeadConnectFailed { .. }));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(harness.launcher.all_disposed());
    assert!(harness.remote.commands().is_empty());
    assert_eq!(orchestrator.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_status_reported_on_timeout() {
    let mut harness = Harness::new(
        FakeLauncher::default(),
        &[String::new(), "qstat: Unknown queue destination\n".to_string()],
    );
    harness.settings.placement_timeout = Duration::from_secs(20);
    let mut orchestrator = harness.orchestrator();

    let err = orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ConnectError::PlacementTimeout { reason } => {
            assert!(reason.contains("Unknown queue destination"));
            assert!(reason.contains("(queue summary)"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(harness.remote.count("qdel 417"), 1);
    assert!(harness.launcher.all_disposed());
}

#[tokio::test(start_paused = true)]
async fn test_leftover_job_cancelled_before_submission() {
    let harness = Harness::new(
        FakeLauncher::default(),
        &[queued(), queued(), placed()],
    );
    let mut orchestrator = harness.orchestrator();

    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();

    let commands = harness.remote.commands();
    let qdel = commands.iter().position(|c| c == "qdel 417").unwrap();
    let qsub = commands.iter().position(|c| c.contains("qsub")).unwrap();
    assert!(qdel < qsub);
}

#[tokio::test(start_paused = true)]
async fn test_interactive_submission() {
    let mut harness = Harness::new(FakeLauncher::default(), &[String::new()]);
    harness.settings.submission = SubmissionMode::Interactive;
    let mut orchestrator = harness.orchestrator();

    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();

    let session = orchestrator.session();
    assert_eq!(session.assigned_node_name.as_deref(), Some("s001-n042"));
    assert_eq!(
        session.tunnel_job_id.as_deref(),
        Some("418.v-qsvr-1.aidevcloud")
    );
    assert_eq!(harness.remote.count("mkdir"), 0);

    let sent = harness.launcher.sent.lock().unwrap().clone();
    assert!(sent.iter().any(|t| t.starts_with("qsub -I -l nodes=1:xeon:ppn=2")));
    assert!(sent.iter().any(|t| t == "qstat -f 418.v-qsvr-1.aidevcloud\n"));

    orchestrator.close_connection().await.unwrap();
    assert_eq!(harness.remote.count("qdel 418.v-qsvr-1.aidevcloud"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_supervise_closes_before_wall_time() {
    let harness = Harness::new(FakeLauncher::default(), &happy_statuses());
    let mut orchestrator = harness.orchestrator();
    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();
    let activated = Instant::now();

    let reason = orchestrator
        .supervise(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reason, CloseReason::WallTimeExhausted);
    // 5 minutes less two 30 second timeouts
    assert!(activated.elapsed() > Duration::from_secs(240));
    assert!(activated.elapsed() < Duration::from_secs(242));
    assert_eq!(harness.remote.count("qdel 417"), 1);
    assert!(harness.launcher.all_disposed());
    assert_eq!(
        *harness.profiles.unregistered.lock().unwrap(),
        vec!["s001-n042".to_string()]
    );
    assert_eq!(orchestrator.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_supervise_notices_lost_head_session() {
    let harness = Harness::new(FakeLauncher::default(), &happy_statuses());
    let mut orchestrator = harness.orchestrator();
    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();

    let head = orchestrator.session().head_session.unwrap();
    let launcher = harness.launcher.clone();
    let shutdown = CancellationToken::new();

    let (reason, _) = tokio::join!(orchestrator.supervise(&shutdown), async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        launcher.exit(head, 255);
    });

    assert_eq!(reason.unwrap(), CloseReason::HeadSessionLost);
    assert!(harness.launcher.all_disposed());
    assert_eq!(harness.remote.count("qdel 417"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_work_terminal_disposed_on_close() {
    let harness = Harness::new(FakeLauncher::default(), &happy_statuses());
    let mut orchestrator = harness.orchestrator();
    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();

    let work = orchestrator.open_work_terminal().unwrap();
    let spec = harness
        .launcher
        .opened()
        .into_iter()
        .find(|(id, _)| *id == work)
        .map(|(_, spec)| spec)
        .unwrap();
    assert!(spec.interactive);
    assert_eq!(spec.command, "ssh s001-n042.aidevcloud");

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    assert_eq!(
        orchestrator.supervise(&shutdown).await.unwrap(),
        CloseReason::Requested
    );
    assert!(harness.launcher.disposed().contains(&work));
}

#[tokio::test(start_paused = true)]
async fn test_guards_on_connection_state() {
    let harness = Harness::new(FakeLauncher::default(), &happy_statuses());
    let mut orchestrator = harness.orchestrator();

    assert!(matches!(
        orchestrator.close_connection().await,
        Err(ConnectError::NotConnected)
    ));
    assert!(matches!(
        orchestrator.open_work_terminal(),
        Err(ConnectError::NotConnected)
    ));

    orchestrator
        .setup_connection(CancellationToken::new())
        .await
        .unwrap();
    let opened = harness.launcher.opened().len();

    assert!(matches!(
        orchestrator.setup_connection(CancellationToken::new()).await,
        Err(ConnectError::AlreadyConnected)
    ));
    assert_eq!(harness.launcher.opened().len(), opened);
    assert!(orchestrator.is_connected());
}
