//! Blocking execution of the external transcoding process.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// How the external process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exit status 0.
    Success,
    /// Non-zero exit status.
    Failed(i32),
    /// Killed by a signal.
    Terminated,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Success)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            return ProcessExit::Success;
        }
        match status.code() {
            Some(code) => ProcessExit::Failed(code),
            None => ProcessExit::Terminated,
        }
    }
}

/// Runs a command to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command`, waiting for it to exit. When `stderr_sink` is given the
    /// process's standard error is appended to that file verbatim.
    ///
    /// `Err` means the process could not be started at all.
    async fn run(&self, command: Command, stderr_sink: Option<&Path>) -> io::Result<ProcessExit>;
}

/// [`ProcessRunner`] on `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: Command, stderr_sink: Option<&Path>) -> io::Result<ProcessExit> {
        let mut cmd = tokio::process::Command::from(command);
        cmd.stdin(Stdio::null()).stdout(Stdio::null());

        match stderr_sink {
            Some(path) => {
                let log = OpenOptions::new().create(true).append(true).open(path)?;
                cmd.stderr(Stdio::from(log));
            }
            None => {
                cmd.stderr(Stdio::null());
            }
        }

        let status = cmd.status().await?;
        Ok(ProcessExit::from(status))
    }
}
