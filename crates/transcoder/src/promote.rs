//! Promotion of staged transcoder output into the library.
//!
//! Moves a finished file out of the staging directory into its final place,
//! falling back to copy-and-delete when the two live on different filesystems.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while promoting output.
#[derive(Debug, Error)]
pub enum PromoteError {
    /// The staged output does not exist.
    #[error("Staged output missing at {path}: {source}")]
    StagedMissing { path: PathBuf, source: io::Error },

    /// Could not create the destination directory.
    #[error("Failed to create {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    /// Cross-device copy failed; the staged file is left in place.
    #[error("Failed to copy {from} to {to}: {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Copy succeeded but the staged file could not be removed.
    #[error("Failed to remove staged file {path}: {source}")]
    CleanupFailed { path: PathBuf, source: io::Error },
}

/// Moves `staged` to `destination`, replacing any existing file there.
///
/// Steps:
/// 1. Confirm the staged file exists
/// 2. Create the destination directory if needed
/// 3. Rename; if that fails (cross-filesystem), copy then delete the staged file
///
/// A failed copy removes the partial destination and keeps the staged file for inspection.
pub fn promote(staged: &Path, destination: &Path) -> Result<(), PromoteError> {
    fs::metadata(staged).map_err(|source| PromoteError::StagedMissing {
        path: staged.to_path_buf(),
        source,
    })?;

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| PromoteError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    if fs::rename(staged, destination).is_ok() {
        return Ok(());
    }

    if let Err(source) = fs::copy(staged, destination) {
        let _ = fs::remove_file(destination);
        return Err(PromoteError::CopyFailed {
            from: staged.to_path_buf(),
            to: destination.to_path_buf(),
            source,
        });
    }

    fs::remove_file(staged).map_err(|source| PromoteError::CleanupFailed {
        path: staged.to_path_buf(),
        source,
    })
}
