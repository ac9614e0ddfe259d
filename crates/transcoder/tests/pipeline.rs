//! End-to-end run: orchestrate a small library on disk, then feed the
//! resulting event log to the savings aggregator.

use async_trait::async_trait;
use library_transcoder::config::{CpuConfig, TranscoderConfig};
use library_transcoder::probe::VideoStream;
use library_transcoder::{
    aggregate_dir, EventLog, ExecutorSettings, FileClassifier, MediaProbe, Orchestrator,
    ProbeError, ProbeResult, ProcessExit, ProcessRunner, RetryPolicy, RunOptions, SentinelStore,
    StateStore, TranscodeExecutor,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const MB: usize = 1024 * 1024;

/// Every `.mkv` is a 1080p video; nothing else is media.
struct MkvProbe;

impl MediaProbe for MkvProbe {
    fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("mkv") | Some("mp4") => Ok(ProbeResult {
                video_streams: vec![VideoStream {
                    codec_name: "hevc".to_string(),
                    width: 1920,
                    height: 1080,
                }],
            }),
            _ => Err(ProbeError::FfprobeFailed("no streams".to_string())),
        }
    }
}

/// Writes a quarter-size output for whatever `-i` points at.
struct ShrinkingRunner;

#[async_trait]
impl ProcessRunner for ShrinkingRunner {
    async fn run(&self, command: Command, stderr_sink: Option<&Path>) -> io::Result<ProcessExit> {
        let args: Vec<String> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let value = |flag: &str| {
            args.windows(2)
                .find(|w| w[0] == flag)
                .map(|w| PathBuf::from(&w[1]))
        };
        let (Some(input), Some(output)) = (value("-i"), value("-o")) else {
            return Ok(ProcessExit::Failed(2));
        };

        if let Some(sink) = stderr_sink {
            fs::write(sink, "Encoding: task 1 of 1, 100.00 %\n")?;
        }
        let size = fs::metadata(&input)?.len() as usize / 4;
        fs::write(output, vec![0u8; size])?;
        Ok(ProcessExit::Success)
    }
}

fn add(root: &Path, rel: &str, size: usize) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, vec![1u8; size]).unwrap();
    path
}

fn orchestrator(root: &Path, staging: &Path, log_dir: &Path) -> Orchestrator {
    let store: Arc<dyn StateStore> = Arc::new(SentinelStore::new());
    let classifier = FileClassifier::new(Arc::new(MkvProbe), store.clone());
    let executor = TranscodeExecutor::new(
        Arc::new(ShrinkingRunner),
        store,
        ExecutorSettings {
            library_root: root.to_path_buf(),
            staging_dir: staging.to_path_buf(),
            cpu: CpuConfig::default(),
            transcoder: TranscoderConfig::default(),
            retry: RetryPolicy::unbounded(Duration::ZERO),
        },
    );
    let log = EventLog::open(log_dir, "integration-host").unwrap();
    Orchestrator::new(
        root.to_path_buf(),
        classifier,
        executor,
        log,
        RunOptions {
            cooldown: Duration::ZERO,
            ..RunOptions::default()
        },
    )
}

#[tokio::test]
async fn test_run_then_aggregate() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("media");
    let staging = temp.path().join("staging");
    let log_dir = temp.path().join("logs");
    fs::create_dir_all(&staging).unwrap();

    let movie = add(&root, "movies/Foo (2020)/Foo (2020).mkv", 8 * MB);
    add(&root, "movies/Foo (2020)/Foo (2020).nfo", 100);
    let episode = add(&root, "tv/Show/Season 1/Show - S01E01.mkv", 4 * MB);
    add(&root, "tv/Show/.partial/Show - S01E02.mkv", 4 * MB);
    add(&root, "music/Album/track.mkv", MB);

    let report = orchestrator(&root, &staging, &log_dir).run().await.unwrap();

    assert_eq!(report.transcoded.len(), 2);
    assert!(report.failed.is_empty());
    assert!(!movie.exists());
    assert!(!episode.exists());

    let movie_dir = root.join("movies/Foo (2020)");
    let output = movie_dir.join("Foo (2020) - WEB-DL-1080p.mp4");
    assert_eq!(fs::metadata(&output).unwrap().len(), 2 * MB as u64);
    assert!(movie_dir.join("Foo (2020) - WEB-DL-1080p.istranscoded").is_file());
    assert!(fs::read_to_string(movie_dir.join("Foo (2020) - WEB-DL-1080p.transcodelog"))
        .unwrap()
        .contains("100.00 %"));
    assert!(root.join("tv/Show/.partial/Show - S01E02.mkv").exists());
    assert!(root.join("music/Album/track.mkv").exists());

    let summary = aggregate_dir(&log_dir).unwrap();
    assert_eq!(summary.items.len(), 2);
    let mut names: Vec<_> = summary.items.iter().map(|r| r.common_name.as_str()).collect();
    names.sort();
    assert_eq!(names, ["Foo (2020)", "Show - S01E01"]);

    // Sizes are logged in GB with two decimals, so tiny fixtures round down
    for record in &summary.items {
        assert!(record.savings_gb >= 0.0);
        assert!(record.savings_gb <= record.before_gb);
    }
    assert!(summary.total_savings_tb >= 0.0);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("media");
    let staging = temp.path().join("staging");
    let log_dir = temp.path().join("logs");
    fs::create_dir_all(&staging).unwrap();
    add(&root, "movies/Bar/Bar.mkv", MB);

    let first = orchestrator(&root, &staging, &log_dir).run().await.unwrap();
    assert_eq!(first.transcoded.len(), 1);

    let second = orchestrator(&root, &staging, &log_dir).run().await.unwrap();
    assert!(second.transcoded.is_empty());

    let rows = fs::read_to_string(log_dir.join("integration-host.log")).unwrap();
    assert_eq!(rows.lines().count(), 3, "header plus one start/end pair:\n{}", rows);
}

#[tokio::test]
async fn test_fresh_progress_log_blocks_second_host() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("media");
    let staging = temp.path().join("staging");
    let log_dir = temp.path().join("logs");
    fs::create_dir_all(&staging).unwrap();
    let source = add(&root, "movies/Baz/Baz.mkv", MB);
    let progress = root.join("movies/Baz/Baz - WEB-DL-1080p.transcodelog");
    fs::write(&progress, "").unwrap();

    let report = orchestrator(&root, &staging, &log_dir).run().await.unwrap();

    assert!(report.transcoded.is_empty());
    assert!(source.exists());
    let rows = fs::read_to_string(log_dir.join("integration-host.log")).unwrap();
    assert_eq!(rows.lines().count(), 1);
}
