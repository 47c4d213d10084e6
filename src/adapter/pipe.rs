//! Media pipe: a supervised converter subprocess
//!
//! The converter reads the RTSP source and writes the browser-facing byte
//! stream to stdout. `MediaPipe` owns the child, its stdout, and the task
//! that drains stderr. The child is spawned with `kill_on_drop`, so a pipe
//! that is dropped without `close()` still takes its process down with it.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

use super::source::{ChunkSource, PipeOutput};

/// How long to wait for the stderr task to flush after the child exits
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Outcome of a converter process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit status, if the process could be reaped
    pub status: Option<ExitStatus>,
    /// Read or wait error that ended the pipe, if any
    pub error: Option<String>,
    /// Whether the exit was requested through `close()`
    pub requested: bool,
}

impl ExitReport {
    /// Report for a pipe that ended without a child process to reap
    pub fn detached(requested: bool) -> Self {
        Self {
            status: None,
            error: None,
            requested,
        }
    }

    /// True if the process exited with status zero
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.map(|s| s.success()).unwrap_or(false)
    }
}

impl std::fmt::Display for ExitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.status, &self.error) {
            (_, Some(err)) => write!(f, "pipe error: {}", err),
            (Some(status), None) => write!(f, "{}", status),
            (None, None) => write!(f, "closed"),
        }
    }
}

/// A running converter process and its output stream
pub struct MediaPipe {
    label: String,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    chunk_size: usize,
    buf: BytesMut,
    finished: Option<ExitReport>,
}

impl MediaPipe {
    /// Spawn `command` with stdout piped
    ///
    /// `label` identifies the pipe in logs. When `verbose` is set, stderr is
    /// forwarded line by line to `tracing`; otherwise it is discarded.
    pub fn spawn(
        mut command: Command,
        label: impl Into<String>,
        chunk_size: usize,
        verbose: bool,
    ) -> Result<Self> {
        let label = label.into();

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if verbose {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            let program = command.as_std().get_program().to_string_lossy().into_owned();
            Error::LaunchFailure(format!("{}: {}", program, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::LaunchFailure("stdout was not captured".into()))?;

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(log_stderr(stderr, label.clone())));

        tracing::debug!(stream = %label, pid = ?child.id(), "Media pipe started");

        Ok(Self {
            label,
            child,
            stdout: Some(stdout),
            stderr_task,
            chunk_size: chunk_size.max(1),
            buf: BytesMut::new(),
            finished: None,
        })
    }

    /// OS process id, while the process is running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the pipe has reached its end
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Read the next chunk of converter output
    ///
    /// Each chunk is exactly what one read of stdout returned. Once the
    /// output ends (EOF, read error, or `close()`), the process is reaped
    /// and every call returns the same `PipeOutput::End`.
    pub async fn next_chunk(&mut self) -> PipeOutput {
        if let Some(report) = &self.finished {
            return PipeOutput::End(report.clone());
        }

        let Some(stdout) = self.stdout.as_mut() else {
            return PipeOutput::End(self.finish(None, false).await);
        };

        self.buf.clear();
        self.buf.resize(self.chunk_size, 0);

        match stdout.read(&mut self.buf[..]).await {
            Ok(0) => PipeOutput::End(self.finish(None, false).await),
            Ok(n) => {
                self.buf.truncate(n);
                PipeOutput::Chunk(self.buf.split().freeze())
            }
            Err(e) => PipeOutput::End(self.finish(Some(e.to_string()), false).await),
        }
    }

    /// Terminate the process if it is still running and release its handles
    ///
    /// Safe to call any number of times.
    pub async fn close(&mut self) -> ExitReport {
        if let Some(report) = &self.finished {
            return report.clone();
        }

        if let Err(e) = self.child.start_kill() {
            // Already exited; reaping below picks up the status.
            tracing::trace!(stream = %self.label, error = %e, "Kill skipped");
        }

        self.finish(None, true).await
    }

    async fn finish(&mut self, error: Option<String>, requested: bool) -> ExitReport {
        self.stdout = None;

        let (status, error) = match self.child.wait().await {
            Ok(status) => (Some(status), error),
            Err(e) => (None, error.or_else(|| Some(e.to_string()))),
        };

        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }

        let report = ExitReport {
            status,
            error,
            requested,
        };

        tracing::debug!(stream = %self.label, report = %report, requested, "Media pipe finished");

        self.finished = Some(report.clone());
        report
    }
}

impl ChunkSource for MediaPipe {
    async fn next_chunk(&mut self) -> PipeOutput {
        MediaPipe::next_chunk(self).await
    }

    async fn close(&mut self) -> ExitReport {
        MediaPipe::close(self).await
    }
}

async fn log_stderr(stderr: ChildStderr, label: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::debug!(stream = %label, "ffmpeg: {}", line);
        }
    }
}

/// Collect a pipe's output until it ends
#[cfg(test)]
pub(crate) async fn drain(pipe: &mut MediaPipe) -> (Vec<u8>, ExitReport) {
    let mut data = Vec::new();
    loop {
        match pipe.next_chunk().await {
            PipeOutput::Chunk(chunk) => data.extend_from_slice(&chunk),
            PipeOutput::End(report) => return (data, report),
        }
    }
}
