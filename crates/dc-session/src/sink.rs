//! Per-stage log sinks
//!
//! A sink is a temporary file that a session's output is redirected into.
//! Each stage of each attempt gets its own; the file is removed when the
//! sink is dropped.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::remote::shell_quote;
use crate::watcher::TextSource;

const CREATE_ATTEMPTS: usize = 8;

/// A temporary text file collecting one stage's output
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    /// Create `<dir>/devconnect.<stage>.<random>.txt`
    pub fn create(dir: &Path, stage: &str) -> io::Result<Self> {
        let mut last_err = None;

        for _ in 0..CREATE_ATTEMPTS {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(6)
                .map(char::from)
                .collect();
            let path = dir.join(format!("devconnect.{}.{}.txt", stage, suffix));

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    tracing::debug!("Created {} sink at {:?}", stage, path);
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AlreadyExists)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shell redirect clause that sends stdout here
    pub fn redirect(&self) -> String {
        format!("> {}", shell_quote(&self.path.to_string_lossy()))
    }

    /// Everything written so far
    pub fn contents(&self) -> String {
        match std::fs::read(&self.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                tracing::debug!("Failed to read sink {:?}: {}", self.path, e);
                String::new()
            }
        }
    }
}

impl TextSource for LogSink {
    fn read_text(&self) -> String {
        self.contents()
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove sink {:?}: {}", self.path, e),
        }
    }
}
