//! Startup checks module for the library transcoder
//!
//! Preflight checks run before the transcode loop so environment problems
//! fail the run up front instead of part-way through:
//! - Library root exists
//! - Docker CLI answers `--version`
//! - Log directory is writable (and the host log has its header)

use crate::event_log::{EventLog, EventLogError};
use library_transcoder_config::Config;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Docker not available: {0}")]
    DockerUnavailable(String),

    #[error("Library root {0} is not a directory")]
    LibraryRootMissing(PathBuf),

    #[error("Log directory unusable: {0}")]
    LogDir(#[from] EventLogError),
}

/// Check that the library root is an existing directory
pub fn check_library_root(root: &Path) -> Result<(), StartupError> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(StartupError::LibraryRootMissing(root.to_path_buf()))
    }
}

/// Check if Docker is available by running `<docker_bin> --version`
pub fn check_docker_available(docker_bin: &str) -> Result<(), StartupError> {
    let output = Command::new(docker_bin)
        .arg("--version")
        .output()
        .map_err(|e| {
            StartupError::DockerUnavailable(format!(
                "{} --version failed; is Docker installed and in PATH? Error: {}",
                docker_bin, e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::DockerUnavailable(format!(
            "{} --version exited with {}",
            docker_bin, output.status
        )));
    }

    Ok(())
}

/// Open (creating if needed) this host's event log
pub fn check_log_dir(log_dir: &Path, hostname: &str) -> Result<EventLog, StartupError> {
    Ok(EventLog::open(log_dir, hostname)?)
}

/// Run all startup checks and hand back the opened event log
pub fn run_startup_checks(cfg: &Config, hostname: &str) -> Result<EventLog, StartupError> {
    check_library_root(&cfg.library.root_dir)?;
    check_docker_available(&cfg.transcoder.docker_bin)?;
    let log = check_log_dir(&cfg.library.log_dir, hostname)?;

    info!(log = %log.path().display(), "startup checks passed");
    Ok(log)
}
