//! Transcode state tracking via sentinel files.
//!
//! Every item's state lives beside it on disk:
//! - `<key>.transcodelog`: stderr of the running transcode; its mtime is the liveness heartbeat
//! - `<key>.istranscoded`: empty completion marker
//! - `<key>.mp4`: the transcoded output
//!
//! The [`StateStore`] trait lets the run loop work against [`MemoryStateStore`] in tests.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// A transcode log older than this is presumed abandoned by a crashed run.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(10 * 3600);

pub const COMPLETION_EXTENSION: &str = "istranscoded";
pub const PROGRESS_EXTENSION: &str = "transcodelog";
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Extension-less tagged path (`<dir>/<common name><quality tag>`) identifying an item's sentinels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SentinelKey {
    base: PathBuf,
}

impl SentinelKey {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Appends `.extension` to the base. Dots already in the base are kept.
    pub fn with_extension(&self, extension: &str) -> PathBuf {
        let mut path: OsString = self.base.as_os_str().to_owned();
        path.push(".");
        path.push(extension);
        PathBuf::from(path)
    }

    pub fn completion_marker(&self) -> PathBuf {
        self.with_extension(COMPLETION_EXTENSION)
    }

    pub fn progress_log(&self) -> PathBuf {
        self.with_extension(PROGRESS_EXTENSION)
    }

    pub fn output(&self) -> PathBuf {
        self.with_extension(OUTPUT_EXTENSION)
    }
}

/// Durable per-item transcode state.
pub trait StateStore: Send + Sync {
    /// Completion marker and output both exist.
    fn is_completed(&self, key: &SentinelKey) -> bool;

    /// Progress was touched within [`LIVENESS_WINDOW`] of `now`.
    fn is_in_progress(&self, key: &SentinelKey, now: SystemTime) -> bool;

    fn mark_completed(&self, key: &SentinelKey) -> io::Result<()>;

    /// Start a fresh attempt, replacing any stale progress record.
    ///
    /// File-backed stores return the file the transcoder's stderr should be captured into.
    fn touch_progress(&self, key: &SentinelKey) -> io::Result<Option<PathBuf>>;
}

/// True when `touched` lies within [`LIVENESS_WINDOW`] before `now`.
///
/// A timestamp in the future counts as fresh.
pub fn is_fresh(touched: SystemTime, now: SystemTime) -> bool {
    match now.duration_since(touched) {
        Ok(age) => age <= LIVENESS_WINDOW,
        Err(_) => true,
    }
}

/// [`StateStore`] backed by sentinel files next to the media.
#[derive(Debug, Clone, Default)]
pub struct SentinelStore;

impl SentinelStore {
    pub fn new() -> Self {
        Self
    }
}

impl StateStore for SentinelStore {
    fn is_completed(&self, key: &SentinelKey) -> bool {
        key.completion_marker().is_file() && key.output().is_file()
    }

    fn is_in_progress(&self, key: &SentinelKey, now: SystemTime) -> bool {
        fs::metadata(key.progress_log())
            .and_then(|m| m.modified())
            .map(|modified| is_fresh(modified, now))
            .unwrap_or(false)
    }

    /// Creates an empty `.istranscoded` marker; existence is the only signal.
    fn mark_completed(&self, key: &SentinelKey) -> io::Result<()> {
        File::create(key.completion_marker())?;
        Ok(())
    }

    /// Truncates (or creates) the `.transcodelog`, refreshing its mtime.
    fn touch_progress(&self, key: &SentinelKey) -> io::Result<Option<PathBuf>> {
        let log_path = key.progress_log();
        File::create(&log_path)?;
        Ok(Some(log_path))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    completed: HashSet<SentinelKey>,
    progress: HashMap<SentinelKey, SystemTime>,
}

/// In-memory [`StateStore`] for exercising the run loop without a filesystem.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<MemoryState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a transcode log was last written at `at`.
    pub fn set_progress_at(&self, key: &SentinelKey, at: SystemTime) {
        if let Ok(mut state) = self.state.lock() {
            state.progress.insert(key.clone(), at);
        }
    }

    pub fn completed_count(&self) -> usize {
        self.state.lock().map(|s| s.completed.len()).unwrap_or(0)
    }
}

impl StateStore for MemoryStateStore {
    fn is_completed(&self, key: &SentinelKey) -> bool {
        self.state
            .lock()
            .map(|s| s.completed.contains(key))
            .unwrap_or(false)
    }

    fn is_in_progress(&self, key: &SentinelKey, now: SystemTime) -> bool {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.progress.get(key).copied())
            .map(|touched| is_fresh(touched, now))
            .unwrap_or(false)
    }

    fn mark_completed(&self, key: &SentinelKey) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "state store poisoned"))?;
        state.completed.insert(key.clone());
        Ok(())
    }

    fn touch_progress(&self, key: &SentinelKey) -> io::Result<Option<PathBuf>> {
        self.set_progress_at(key, SystemTime::now());
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key_in(dir: &Path, name: &str) -> SentinelKey {
        SentinelKey::new(dir.join(name))
    }

    #[test]
    fn test_sentinel_paths() {
        let key = SentinelKey::new(PathBuf::from("/media/movies/Foo/Foo.2020 - WEB-DL-1080p"));
        assert_eq!(
            key.completion_marker(),
            PathBuf::from("/media/movies/Foo/Foo.2020 - WEB-DL-1080p.istranscoded")
        );
        assert_eq!(
            key.progress_log(),
            PathBuf::from("/media/movies/Foo/Foo.2020 - WEB-DL-1080p.transcodelog")
        );
        assert_eq!(
            key.output(),
            PathBuf::from("/media/movies/Foo/Foo.2020 - WEB-DL-1080p.mp4")
        );
    }

    #[test]
    fn test_is_fresh_window() {
        let now = SystemTime::now();
        assert!(is_fresh(now, now));
        assert!(is_fresh(now - Duration::from_secs(9 * 3600), now));
        assert!(is_fresh(now - LIVENESS_WINDOW, now));
        assert!(!is_fresh(now - LIVENESS_WINDOW - Duration::from_secs(1), now));
        assert!(is_fresh(now + Duration::from_secs(60), now));
    }

    #[test]
    fn test_completed_requires_marker_and_output() {
        let temp_dir = TempDir::new().unwrap();
        let store = SentinelStore::new();
        let key = key_in(temp_dir.path(), "Foo - WEB-DL-1080p");

        assert!(!store.is_completed(&key));

        store.mark_completed(&key).unwrap();
        assert!(key.completion_marker().exists());
        assert!(fs::read(key.completion_marker()).unwrap().is_empty());
        assert!(!store.is_completed(&key), "marker alone is not completion");

        File::create(key.output()).unwrap();
        assert!(store.is_completed(&key));
    }

    #[test]
    fn test_touch_progress_marks_in_progress() {
        let temp_dir = TempDir::new().unwrap();
        let store = SentinelStore::new();
        let key = key_in(temp_dir.path(), "Show S01E01 - WEB-DL-720p");

        assert!(!store.is_in_progress(&key, SystemTime::now()));

        let log = store.touch_progress(&key).unwrap();
        assert_eq!(log, Some(key.progress_log()));
        assert!(store.is_in_progress(&key, SystemTime::now()));
    }

    #[test]
    fn test_stale_progress_log_is_not_in_progress() {
        let temp_dir = TempDir::new().unwrap();
        let store = SentinelStore::new();
        let key = key_in(temp_dir.path(), "Foo - WEB-DL-1080p");
        store.touch_progress(&key).unwrap();

        let eleven_hours_later = SystemTime::now() + Duration::from_secs(11 * 3600);
        assert!(!store.is_in_progress(&key, eleven_hours_later));
        assert!(!store.is_completed(&key));
    }

    #[test]
    fn test_touch_progress_truncates_previous_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let store = SentinelStore::new();
        let key = key_in(temp_dir.path(), "Foo - WEB-DL-1080p");
        fs::write(key.progress_log(), b"previous crash output").unwrap();

        store.touch_progress(&key).unwrap();
        assert!(fs::read(key.progress_log()).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        let key = SentinelKey::new(PathBuf::from("/m/tv/Show/Ep - WEB-DL-720p"));
        let now = SystemTime::now();

        assert!(!store.is_in_progress(&key, now));
        assert_eq!(store.touch_progress(&key).unwrap(), None);
        assert!(store.is_in_progress(&key, SystemTime::now()));

        store.set_progress_at(&key, now - Duration::from_secs(12 * 3600));
        assert!(!store.is_in_progress(&key, now));

        store.mark_completed(&key).unwrap();
        assert!(store.is_completed(&key));
        assert_eq!(store.completed_count(), 1);
    }
}
