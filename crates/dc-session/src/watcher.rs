//! Polling pattern watcher
//!
//! Neither the scheduler nor ssh tell us when something happened. Output is
//! redirected into a sink and sampled on a fixed tick until a pattern shows
//! up, the attempt is cancelled, the driving process fails, or the deadline
//! passes. Whichever comes first wins and polling stops right there.

use regex::Regex;
use std::time::Duration;

use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Something whose full current text can be sampled
pub trait TextSource {
    /// Current contents; a source that does not exist yet reads as empty
    fn read_text(&self) -> String;
}

impl TextSource for String {
    fn read_text(&self) -> String {
        self.clone()
    }
}

/// What to look for in a sink
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Plain substring
    Literal(String),
    /// Regular expression; the first capture group, if any, is reported
    Regex(Regex),
}

impl Pattern {
    /// `None` if absent, otherwise the captured text (if the pattern captures)
    pub fn find(&self, text: &str) -> Option<Option<String>> {
        match self {
            Pattern::Literal(needle) => text.contains(needle.as_str()).then_some(None),
            Pattern::Regex(re) => re
                .captures(text)
                .map(|caps| caps.get(1).map(|m| m.as_str().to_string())),
        }
    }
}

/// Result of one wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Pattern found, with its capture
    Matched(Option<String>),
    /// Deadline elapsed first
    TimedOut,
    /// Attempt was cancelled
    Cancelled,
    /// The driving process reported a fatal exit
    ExternalFailure,
}

/// Sample `source` every `poll` until `pattern` appears
///
/// `failed` is consulted on every tick and ends the wait with
/// [`WatchOutcome::ExternalFailure`] once it returns true.
pub async fn await_pattern<S, F>(
    source: &S,
    pattern: &Pattern,
    poll: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
    failed: F,
) -> WatchOutcome
where
    S: TextSource + ?Sized,
    F: Fn() -> bool,
{
    let expiry = sleep(deadline);
    tokio::pin!(expiry);

    let mut ticker = interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return WatchOutcome::Cancelled,
            _ = &mut expiry => return WatchOutcome::TimedOut,
            _ = ticker.tick() => {
                if let Some(capture) = pattern.find(&source.read_text()) {
                    return WatchOutcome::Matched(capture);
                }
                if failed() {
                    return WatchOutcome::ExternalFailure;
                }
            }
        }
    }
}
