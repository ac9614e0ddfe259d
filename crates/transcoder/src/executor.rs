//! Transcode executor module for the library transcoder
//!
//! Runs one item through the external transcoder: CPU budget, command,
//! per-item stderr log, retry on process failure, then the destructive
//! swap of source for output and the completion marker.

use crate::budget::CpuBudget;
use crate::classify::Inspection;
use crate::encode::{build_handbrake_command, HandbrakeParams};
use crate::promote::{promote, PromoteError};
use crate::retry::RetryPolicy;
use crate::runner::{ProcessExit, ProcessRunner};
use crate::state::{SentinelKey, StateStore};
use library_transcoder_config::{CpuConfig, TranscoderConfig};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Error type for transcode operations
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The source disappeared between discovery and processing
    #[error("Source file missing: {path}: {source}")]
    MissingSource { path: PathBuf, source: io::Error },

    /// The transcoder could not be started at all
    #[error("Failed to start transcoder: {0}")]
    Spawn(io::Error),

    /// A bounded retry policy ran out
    #[error("Transcoder failed {attempts} times, last exit: {last:?}")]
    RetriesExhausted { attempts: u32, last: ProcessExit },

    /// The transcoder reported success but left no usable output
    #[error("Transcoder produced no output at {path} after {attempts} attempt(s)")]
    NoOutput { path: PathBuf, attempts: u32 },

    /// Output could not be moved into the library
    #[error("Failed to promote output: {0}")]
    Promote(#[from] PromoteError),

    /// Sentinel files could not be written
    #[error("Failed to update transcode state for {path}: {source}")]
    State { path: PathBuf, source: io::Error },
}

impl TranscodeError {
    /// The item vanished underneath us; the run should move on silently.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, TranscodeError::MissingSource { .. })
    }
}

/// Paths and policies the executor needs
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Final output root
    pub library_root: PathBuf,
    /// Scratch directory the transcoder writes into
    pub staging_dir: PathBuf,
    pub cpu: CpuConfig,
    pub transcoder: TranscoderConfig,
    pub retry: RetryPolicy,
}

/// Rewrites a path under `staging_dir` to the same relative path under `library_root`
pub fn relocate(path: &Path, staging_dir: &Path, library_root: &Path) -> PathBuf {
    match path.strip_prefix(staging_dir) {
        Ok(rest) if !staging_dir.as_os_str().is_empty() => library_root.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Executes transcodes one at a time
pub struct TranscodeExecutor {
    runner: Arc<dyn ProcessRunner>,
    store: Arc<dyn StateStore>,
    settings: ExecutorSettings,
}

impl TranscodeExecutor {
    /// Create a new TranscodeExecutor
    ///
    /// # Arguments
    /// * `runner` - Runs the containerised transcoder
    /// * `store` - Where progress and completion are recorded
    /// * `settings` - Paths, encoding policy and retry policy
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        store: Arc<dyn StateStore>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            runner,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Sentinel key of the final output for an inspected source
    pub fn output_key(&self, inspection: &Inspection) -> SentinelKey {
        let key = inspection.sentinel_key();
        SentinelKey::new(relocate(
            key.base(),
            &self.settings.staging_dir,
            &self.settings.library_root,
        ))
    }

    /// Final `.mp4` path for an inspected source
    pub fn output_path(&self, inspection: &Inspection) -> PathBuf {
        self.output_key(inspection).output()
    }

    /// Transcode one file and return the path of the new output
    ///
    /// This method implements the full pipeline:
    /// 1. Computes the output path (common name + quality tag + `.mp4`)
    /// 2. Refreshes the `.transcodelog` and runs the transcoder with stderr captured into it
    /// 3. On failure, waits the backoff and retries while the policy allows;
    ///    a clean exit that leaves no non-empty staged output counts as a failure
    /// 4. Deletes the source (irrevocable)
    /// 5. Moves the staged output into place
    /// 6. Creates the `.istranscoded` marker
    ///
    /// Steps 4-6 are not atomic: a crash between 4 and 5 loses the source.
    pub async fn transcode(&self, inspection: &Inspection) -> Result<PathBuf, TranscodeError> {
        let source = inspection.path.as_path();
        ensure_exists(source)?;

        let key = self.output_key(inspection);
        let output = key.output();
        let staged = self.staged_path(&output);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let sink = self
                .store
                .touch_progress(&key)
                .map_err(|source| TranscodeError::State {
                    path: key.progress_log(),
                    source,
                })?;

            let params = HandbrakeParams {
                input_path: source.to_path_buf(),
                staging_output: staged.clone(),
                library_root: self.settings.library_root.clone(),
                staging_dir: self.settings.staging_dir.clone(),
                budget: CpuBudget::now(&self.settings.cpu),
            };
            let command = build_handbrake_command(&params, &self.settings.transcoder);

            info!(
                path = %source.display(),
                attempt,
                cores = params.budget.cores,
                "starting transcode"
            );

            let exit = self
                .runner
                .run(command, sink.as_deref())
                .await
                .map_err(TranscodeError::Spawn)?;

            if exit.success() {
                if has_output(&staged) {
                    break;
                }
                warn!(
                    path = %source.display(),
                    staged = %staged.display(),
                    "transcoder exited cleanly without output"
                );
            }

            if !self.settings.retry.allows_retry(attempt) {
                return Err(if exit.success() {
                    TranscodeError::NoOutput {
                        path: staged,
                        attempts: attempt,
                    }
                } else {
                    TranscodeError::RetriesExhausted {
                        attempts: attempt,
                        last: exit,
                    }
                });
            }

            warn!(
                path = %source.display(),
                attempt,
                exit = ?exit,
                backoff_secs = self.settings.retry.backoff.as_secs(),
                "transcoder failed, retrying"
            );
            tokio::time::sleep(self.settings.retry.backoff).await;
        }

        fs::remove_file(source).map_err(|e| missing_or_state(source, e))?;
        promote(&staged, &output)?;
        self.store
            .mark_completed(&key)
            .map_err(|source| TranscodeError::State {
                path: key.completion_marker(),
                source,
            })?;

        info!(path = %output.display(), "transcode complete");
        Ok(output)
    }

    fn staged_path(&self, output: &Path) -> PathBuf {
        match output.file_name() {
            Some(name) => self.settings.staging_dir.join(name),
            None => self.settings.staging_dir.join("transcode.mp4"),
        }
    }
}

/// A staged output is usable once it is a non-empty regular file.
fn has_output(staged: &Path) -> bool {
    fs::metadata(staged).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

fn ensure_exists(path: &Path) -> Result<(), TranscodeError> {
    fs::metadata(path)
        .map(|_| ())
        .map_err(|e| missing_or_state(path, e))
}

fn missing_or_state(path: &Path, e: io::Error) -> TranscodeError {
    if e.kind() == io::ErrorKind::NotFound {
        TranscodeError::MissingSource {
            path: path.to_path_buf(),
            source: e,
        }
    } else {
        TranscodeError::State {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeResult, VideoStream};
    use crate::state::{MemoryStateStore, SentinelStore};
    use async_trait::async_trait;
    use std::process::Command;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Returns canned exits in order and writes the `-o` file on success.
    struct ScriptedRunner {
        exits: Mutex<Vec<ProcessExit>>,
        calls: Mutex<u32>,
    }

    impl ScriptedRunner {
        fn new(mut exits: Vec<ProcessExit>) -> Self {
            exits.reverse();
            Self {
                exits: Mutex::new(exits),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, command: Command, stderr_sink: Option<&Path>) -> io::Result<ProcessExit> {
            *self.calls.lock().unwrap() += 1;
            let exit = self.exits.lock().unwrap().pop().unwrap_or(ProcessExit::Success);

            if let Some(sink) = stderr_sink {
                fs::write(sink, format!("{:?}\n", exit))?;
            }
            if exit.success() {
                let args: Vec<String> = command
                    .get_args()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect();
                let out = args
                    .windows(2)
                    .find(|w| w[0] == "-o")
                    .map(|w| PathBuf::from(&w[1]))
                    .unwrap();
                fs::write(out, b"small")?;
            }
            Ok(exit)
        }
    }

    /// Exits cleanly but leaves only an empty `-o` file behind.
    struct SilentRunner {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ProcessRunner for SilentRunner {
        async fn run(&self, command: Command, _stderr_sink: Option<&Path>) -> io::Result<ProcessExit> {
            *self.calls.lock().unwrap() += 1;
            let args: Vec<String> = command
                .get_args()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();
            if let Some(w) = args.windows(2).find(|w| w[0] == "-o") {
                fs::write(&w[1], b"")?;
            }
            Ok(ProcessExit::Success)
        }
    }

    struct Fixture {
        _temp: TempDir,
        library: PathBuf,
        staging: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let library = temp.path().join("media");
        let staging = temp.path().join("staging");
        fs::create_dir_all(library.join("movies/Foo")).unwrap();
        fs::create_dir_all(&staging).unwrap();
        Fixture {
            _temp: temp,
            library,
            staging,
        }
    }

    fn settings(fx: &Fixture, retry: RetryPolicy) -> ExecutorSettings {
        ExecutorSettings {
            library_root: fx.library.clone(),
            staging_dir: fx.staging.clone(),
            cpu: CpuConfig::default(),
            transcoder: TranscoderConfig::default(),
            retry,
        }
    }

    fn full_hd_inspection(path: PathBuf) -> Inspection {
        Inspection {
            path,
            probe: Some(ProbeResult {
                video_streams: vec![VideoStream {
                    codec_name: "h264".to_string(),
                    width: 1920,
                    height: 1080,
                }],
            }),
        }
    }

    #[test]
    fn test_relocate() {
        assert_eq!(
            relocate(Path::new("/tmp/movies/Foo/Foo.mp4"), Path::new("/tmp"), Path::new("/media")),
            PathBuf::from("/media/movies/Foo/Foo.mp4")
        );
        assert_eq!(
            relocate(Path::new("/media/movies/Foo/Foo.mp4"), Path::new("/tmp"), Path::new("/media")),
            PathBuf::from("/media/movies/Foo/Foo.mp4")
        );
    }

    #[tokio::test]
    async fn test_successful_transcode_swaps_source_for_output() {
        let fx = fixture();
        let source = fx.library.join("movies/Foo/Foo.mkv");
        fs::write(&source, b"large source").unwrap();

        let runner = Arc::new(ScriptedRunner::new(vec![ProcessExit::Success]));
        let store = Arc::new(SentinelStore::new());
        let executor = TranscodeExecutor::new(
            runner.clone(),
            store.clone(),
            settings(&fx, RetryPolicy::unbounded(Duration::ZERO)),
        );

        let output = executor.transcode(&full_hd_inspection(source.clone())).await.unwrap();

        assert_eq!(output, fx.library.join("movies/Foo/Foo - WEB-DL-1080p.mp4"));
        assert!(!source.exists(), "source should be deleted");
        assert_eq!(fs::read(&output).unwrap(), b"small");
        assert!(fx.library.join("movies/Foo/Foo - WEB-DL-1080p.istranscoded").exists());
        assert!(fx.library.join("movies/Foo/Foo - WEB-DL-1080p.transcodelog").exists());
        assert!(!fx.staging.join("Foo - WEB-DL-1080p.mp4").exists());
        assert_eq!(runner.calls(), 1);
    }

    #[tokio::test]
    async fn test_clean_exit_without_output_keeps_source() {
        let fx = fixture();
        let source = fx.library.join("movies/Foo/Foo.mkv");
        fs::write(&source, b"large source").unwrap();

        let runner = Arc::new(SilentRunner {
            calls: Mutex::new(0),
        });
        let store = Arc::new(MemoryStateStore::new());
        let executor = TranscodeExecutor::new(
            runner.clone(),
            store.clone(),
            settings(&fx, RetryPolicy::bounded(2, Duration::ZERO)),
        );

        let inspection = full_hd_inspection(source.clone());
        let err = executor.transcode(&inspection).await.unwrap_err();

        assert!(matches!(err, TranscodeError::NoOutput { attempts: 2, .. }));
        assert!(!err.is_missing_file());
        assert_eq!(fs::read(&source).unwrap(), b"large source");
        assert!(!fx.library.join("movies/Foo/Foo - WEB-DL-1080p.mp4").exists());
        assert!(!store.is_completed(&executor.output_key(&inspection)));
        assert_eq!(*runner.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let fx = fixture();
        let source = fx.library.join("movies/Foo/Foo.mkv");
        fs::write(&source, b"large source").unwrap();

        let runner = Arc::new(ScriptedRunner::new(vec![
            ProcessExit::Failed(1),
            ProcessExit::Terminated,
            ProcessExit::Success,
        ]));
        let store = Arc::new(MemoryStateStore::new());
        let executor = TranscodeExecutor::new(
            runner.clone(),
            store.clone(),
            settings(&fx, RetryPolicy::unbounded(Duration::ZERO)),
        );

        let inspection = full_hd_inspection(source.clone());
        executor.transcode(&inspection).await.unwrap();

        assert_eq!(runner.calls(), 3);
        assert!(store.is_completed(&executor.output_key(&inspection)));
    }

    #[tokio::test]
    async fn test_bounded_retries_exhaust_and_keep_source() {
        let fx = fixture();
        let source = fx.library.join("movies/Foo/Foo.mkv");
        fs::write(&source, b"large source").unwrap();

        let runner = Arc::new(ScriptedRunner::new(vec![
            ProcessExit::Failed(2),
            ProcessExit::Failed(2),
            ProcessExit::Success,
        ]));
        let store = Arc::new(MemoryStateStore::new());
        let executor = TranscodeExecutor::new(
            runner.clone(),
            store.clone(),
            settings(&fx, RetryPolicy::bounded(2, Duration::ZERO)),
        );

        let err = executor
            .transcode(&full_hd_inspection(source.clone()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TranscodeError::RetriesExhausted {
                attempts: 2,
                last: ProcessExit::Failed(2)
            }
        ));
        assert!(source.exists(), "source must survive a failed transcode");
        assert_eq!(store.completed_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_missing_file() {
        let fx = fixture();
        let source = fx.library.join("movies/Foo/Gone.mkv");

        let runner = Arc::new(ScriptedRunner::new(vec![]));
        let executor = TranscodeExecutor::new(
            runner.clone(),
            Arc::new(MemoryStateStore::new()),
            settings(&fx, RetryPolicy::default()),
        );

        let err = executor.transcode(&full_hd_inspection(source)).await.unwrap_err();

        assert!(err.is_missing_file());
        assert_eq!(runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_output_path_for_tagged_source() {
        let fx = fixture();
        let executor = TranscodeExecutor::new(
            Arc::new(ScriptedRunner::new(vec![])),
            Arc::new(MemoryStateStore::new()),
            settings(&fx, RetryPolicy::default()),
        );

        let inspection = full_hd_inspection(fx.library.join("movies/Foo/Foo - WEB-DL-720p.mkv"));
        assert_eq!(
            executor.output_path(&inspection),
            fx.library.join("movies/Foo/Foo - WEB-DL-720p.mp4")
        );
    }

    #[tokio::test]
    async fn test_output_relocated_out_of_staging() {
        let fx = fixture();
        let staged_source = fx.staging.join("movies/Foo/Foo.mkv");
        let executor = TranscodeExecutor::new(
            Arc::new(ScriptedRunner::new(vec![])),
            Arc::new(MemoryStateStore::new()),
            settings(&fx, RetryPolicy::default()),
        );

        assert_eq!(
            executor.output_path(&full_hd_inspection(staged_source)),
            fx.library.join("movies/Foo/Foo - WEB-DL-1080p.mp4")
        );
    }
}
