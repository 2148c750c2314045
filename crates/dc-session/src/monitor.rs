//! Active session monitor
//!
//! Tears the session down shortly before the scheduler's wall time would,
//! leaving two connection timeouts of margin, or as soon as a tunnel dies.

use std::fmt;
use std::time::Duration;

use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::patterns::LOG_TICK;

/// Why an active session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Close was requested
    Requested,
    /// Wall time nearly used up
    WallTimeExhausted,
    /// The head node service session exited
    HeadSessionLost,
    /// The compute node tunnel exited
    ComputeSessionLost,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Requested => "close requested",
            CloseReason::WallTimeExhausted => "session wall time is about to expire",
            CloseReason::HeadSessionLost => "head node session terminated",
            CloseReason::ComputeSessionLost => "compute node tunnel terminated",
        };
        f.write_str(s)
    }
}

/// Wall-clock watch over one active session
#[derive(Debug, Clone)]
pub struct SessionMonitor {
    started: Instant,
    threshold: Option<Duration>,
}

impl SessionMonitor {
    /// `deadline` is the job wall time; `None` means unbounded
    pub fn new(started: Instant, deadline: Option<Duration>, connection_timeout: Duration) -> Self {
        Self {
            started,
            threshold: deadline.map(|d| d.saturating_sub(connection_timeout * 2)),
        }
    }

    /// Elapsed time past which the session is closed
    pub fn threshold(&self) -> Option<Duration> {
        self.threshold
    }

    /// Wait until the session has to end
    ///
    /// `probe` runs every tick and reports a lost tunnel.
    pub async fn watch<F>(&self, probe: F, shutdown: &CancellationToken) -> CloseReason
    where
        F: Fn() -> Option<CloseReason>,
    {
        let expiry = async {
            match self.threshold {
                // Fires once elapsed strictly exceeds the threshold
                Some(t) => sleep_until(self.started + t + Duration::from_millis(1)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        let mut ticker = interval(LOG_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return CloseReason::Requested,
                _ = &mut expiry => {
                    tracing::info!(
                        "Session reached {:?} of its wall time, closing",
                        self.threshold.unwrap_or_default()
                    );
                    return CloseReason::WallTimeExhausted;
                }
                _ = ticker.tick() => {
                    if let Some(reason) = probe() {
                        return reason;
                    }
                }
            }
        }
    }
}
