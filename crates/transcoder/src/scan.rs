//! Scanner module for discovering files in the media library.
//!
//! Walks the library lazily (libraries can be arbitrarily large) and filters
//! paths down to the recognised categories, dropping partial downloads.

use crate::media::Category;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Path segment fragment marking an unfinished download.
pub const PARTIAL_MARKER: &str = "partial";

/// Which categories a run considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryFilter {
    /// Only `tv/` content.
    pub tv_only: bool,
}

impl CategoryFilter {
    pub fn new(tv_only: bool) -> Self {
        Self { tv_only }
    }

    /// Keep paths under a `movies`/`tv` segment (only `tv` when `tv_only`),
    /// and never anything inside a partial-download segment.
    pub fn accepts(&self, path: &Path) -> bool {
        let mut category_match = false;

        for component in path.components() {
            let Component::Normal(segment) = component else {
                continue;
            };
            let segment = segment.to_string_lossy();

            if segment.to_lowercase().contains(PARTIAL_MARKER) {
                return false;
            }

            match Category::from_segment(&segment) {
                Some(Category::Tv) => category_match = true,
                Some(Category::Movie) if !self.tv_only => category_match = true,
                _ => {}
            }
        }

        category_match
    }
}

/// Lazily yields every file (not directory) below `root` as an absolute path.
///
/// Each call is a fresh traversal. Unreadable entries are skipped.
pub fn scan(root: &Path) -> impl Iterator<Item = PathBuf> {
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());

    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

/// [`scan`] restricted to paths accepted by `filter`.
pub fn scan_library(root: &Path, filter: CategoryFilter) -> impl Iterator<Item = PathBuf> {
    scan(root).filter(move |path| filter.accepts(path))
}
