//! Capture subprocess ownership and the domain event stream.

use crate::parser::parse_query_line;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Errors from the capture layer.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to spawn capture process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capture process has no stdout handle")]
    NoStdout,

    #[error("error reading from capture process: {0}")]
    Read(std::io::Error),

    #[error("capture process exited")]
    SourceExited,
}

/// Capture subprocess configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture binary to run
    pub command: String,
    /// Arguments passed to the capture binary
    pub args: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: "tcpdump".to_string(),
            args: ["-i", "any", "-l", "--immediate-mode", "-n", "port", "53"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// A single observed name-resolution query.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    /// Lower-cased, fully-qualified name with the trailing dot stripped
    pub name: String,
    /// When the query was seen on the wire
    pub observed_at: Instant,
}

/// Source of domain events.
///
/// The pipeline is generic over this seam so tests can drive it with a
/// scripted sequence instead of a live capture subprocess.
pub trait DomainStream {
    /// Pull the next event.
    ///
    /// `Err(CaptureError::SourceExited)` means the upstream feed is gone
    /// for good. That is a liveness failure, not a normal end-of-stream;
    /// the owning process is expected to restart the whole pipeline.
    fn next_event(&mut self) -> impl Future<Output = Result<DomainEvent, CaptureError>> + Send;
}

/// Live capture source backed by a tcpdump subprocess.
///
/// Owns the child exclusively; the child is killed when the source is
/// dropped. Malformed or undecodable lines are skipped silently, only the
/// subprocess exiting terminates the stream.
pub struct CaptureSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    buf: Vec<u8>,
}

impl CaptureSource {
    /// Spawn the capture subprocess and attach to its output.
    pub fn spawn(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Spawn {
                command: config.command.clone(),
                source: e,
            })?;

        let stdout = child.stdout.take().ok_or(CaptureError::NoStdout)?;

        info!("capture started: {} {}", config.command, config.args.join(" "));

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            buf: Vec::with_capacity(512),
        })
    }

    /// Terminate the capture subprocess and reap it.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("failed to kill capture process: {}", e);
        }
    }
}

impl DomainStream for CaptureSource {
    async fn next_event(&mut self) -> Result<DomainEvent, CaptureError> {
        loop {
            self.buf.clear();
            let n = self
                .stdout
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(CaptureError::Read)?;

            if n == 0 {
                warn!("capture subprocess closed its output");
                return Err(CaptureError::SourceExited);
            }

            // Lossy decode: a line with broken UTF-8 must not kill the stream.
            let line = String::from_utf8_lossy(&self.buf);
            if let Some(name) = parse_query_line(&line) {
                debug!("observed {}", name);
                return Ok(DomainEvent {
                    name,
                    observed_at: Instant::now(),
                });
            }
        }
    }
}
