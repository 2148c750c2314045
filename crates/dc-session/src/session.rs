//! The single live cluster session

use std::time::Duration;

use tokio::time::Instant;

use dc_core::types::SessionId;

/// State of the one connection an orchestrator owns
///
/// Never dropped while the orchestrator lives; [`Session::reset`] returns it
/// to the disconnected state.
#[derive(Debug, Default)]
pub struct Session {
    /// True only while `Active`
    pub connected: bool,
    /// The current attempt was cancelled by the user
    pub cancelled: bool,
    pub tunnel_job_id: Option<String>,
    pub assigned_node_name: Option<String>,
    pub remote_user_name: String,
    pub session_deadline: Option<Duration>,
    /// Head node service session
    pub head_session: Option<SessionId>,
    /// Compute node tunnel session
    pub compute_session: Option<SessionId>,
    /// Every service session opened for this connection
    pub service_sessions: Vec<SessionId>,
    /// Work terminals opened while active
    pub work_sessions: Vec<SessionId>,
    /// When the session became active
    pub activated_at: Option<Instant>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to disconnected, forgetting everything about the last attempt
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Every session id that teardown has to dispose
    pub fn all_sessions(&self) -> Vec<SessionId> {
        self.service_sessions
            .iter()
            .chain(self.work_sessions.iter())
            .copied()
            .collect()
    }

    /// Whether the connection invariant holds
    pub fn is_consistent(&self) -> bool {
        !self.connected
            || (self.assigned_node_name.as_deref().is_some_and(|n| !n.is_empty())
                && self.compute_session.is_some())
    }
}
