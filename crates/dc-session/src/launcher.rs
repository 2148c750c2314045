//! Process launcher backed by pseudo-terminals
//!
//! Service sessions run in a PTY so that ssh sees a terminal and the remote
//! side prints its prompt into the redirected sink. Interactive sessions are
//! attached to the user's own terminal, so host key prompts and work shells
//! behave like a plain `ssh` invocation.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
#[cfg(unix)]
use std::time::{Duration, Instant};

use dashmap::DashMap;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use dc_core::error::LaunchError;
use dc_core::traits::{ProcessLauncher, SessionSpec};
use dc_core::types::SessionId;

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// How long an attached child gets to restore the terminal before SIGKILL
#[cfg(unix)]
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

enum Handle {
    Pty {
        child: Box<dyn portable_pty::Child + Send + Sync>,
        writer: Box<dyn Write + Send>,
        // Keeps the PTY open for the child's lifetime
        _master: Box<dyn MasterPty + Send>,
    },
    Attached(Child),
}

struct LaunchedSession {
    name: String,
    handle: Handle,
    exit_code: Option<i32>,
}

impl LaunchedSession {
    fn try_wait(&mut self) -> Option<i32> {
        if self.exit_code.is_some() {
            return self.exit_code;
        }

        let code = match &mut self.handle {
            Handle::Pty { child, .. } => match child.try_wait() {
                Ok(Some(status)) => Some(status.exit_code() as i32),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("Failed to check session '{}' status: {}", self.name, e);
                    None
                }
            },
            Handle::Attached(child) => match child.try_wait() {
                Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("Failed to check session '{}' status: {}", self.name, e);
                    None
                }
            },
        };

        if let Some(code) = code {
            tracing::info!("Session '{}' exited with code {}", self.name, code);
            self.exit_code = Some(code);
        }
        code
    }

    fn kill(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        let result = match &mut self.handle {
            Handle::Pty { child, .. } => child.kill().and_then(|_| child.wait().map(|_| ())),
            Handle::Attached(child) => terminate(child),
        };
        if let Err(e) = result {
            tracing::debug!("Session '{}' already gone: {}", self.name, e);
        }
    }
}

/// Stop an attached child, letting ssh put the user's tty back first
#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    // SAFETY: the child is ours and has not been reaped, so the pid is live
    if unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let started = Instant::now();
    while started.elapsed() < TERMINATE_GRACE {
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    tracing::debug!("Attached session ignored SIGTERM, killing");
    child.kill()?;
    child.wait().map(|_| ())
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.kill()?;
    child.wait().map(|_| ())
}

/// Launches sessions as local shell processes
pub struct PtyLauncher {
    sessions: DashMap<SessionId, Mutex<LaunchedSession>>,
    next_id: AtomicU64,
}

impl PtyLauncher {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of sessions not yet disposed
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn spawn_pty(&self, spec: &SessionSpec) -> Result<Handle, LaunchError> {
        let spawn_err = |reason: String| LaunchError::Spawn {
            name: spec.name.clone(),
            reason,
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_err(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&spec.shell);
        cmd.arg("-l");
        cmd.arg("-c");
        cmd.arg(&spec.command);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_err(format!("failed to spawn shell: {}", e)))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_err(format!("failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_err(format!("failed to take PTY writer: {}", e)))?;

        // Drain the terminal so the child never blocks on a full buffer
        let name = spec.name.clone();
        std::thread::Builder::new()
            .name(format!("pty-drain-{}", name))
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => tracing::trace!("{}: {} bytes", name, n),
                    }
                }
            })?;

        Ok(Handle::Pty {
            child,
            writer,
            _master: pair.master,
        })
    }

    fn spawn_attached(&self, spec: &SessionSpec) -> Result<Handle, LaunchError> {
        let child = Command::new(&spec.shell)
            .arg("-l")
            .arg("-c")
            .arg(&spec.command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Handle::Attached(child))
    }
}

impl Default for PtyLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for PtyLauncher {
    fn open(&self, spec: &SessionSpec) -> Result<SessionId, LaunchError> {
        if let Some(banner) = &spec.banner {
            eprintln!("{}", banner);
        }

        let handle = if spec.interactive {
            self.spawn_attached(spec)?
        } else {
            self.spawn_pty(spec)?
        };

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::info!("Opened session {} '{}'", id, spec.name);
        tracing::debug!("Session {} runs: {}", id, spec.command);

        self.sessions.insert(
            id,
            Mutex::new(LaunchedSession {
                name: spec.name.clone(),
                handle,
                exit_code: None,
            }),
        );
        Ok(id)
    }

    fn send_text(&self, id: SessionId, text: &str) -> Result<(), LaunchError> {
        let entry = self.sessions.get(&id).ok_or(LaunchError::UnknownSession(id))?;
        let mut session = entry
            .lock()
            .map_err(|_| LaunchError::UnknownSession(id))?;

        match &mut session.handle {
            Handle::Pty { writer, .. } => {
                writer.write_all(text.as_bytes())?;
                writer.flush()?;
                Ok(())
            }
            Handle::Attached(_) => Err(LaunchError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "session is attached to the user's terminal",
            ))),
        }
    }

    fn exit_status(&self, id: SessionId) -> Option<i32> {
        let entry = self.sessions.get(&id)?;
        let mut session = entry.lock().ok()?;
        session.try_wait()
    }

    fn dispose(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            match session.into_inner() {
                Ok(mut session) => {
                    tracing::info!("Closing session {} '{}'", id, session.name);
                    session.kill();
                }
                Err(_) => tracing::warn!("Session {} state was poisoned", id),
            }
        }
    }
}
