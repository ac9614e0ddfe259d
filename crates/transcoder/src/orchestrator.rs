//! Transcode run loop
//!
//! Drives one pass over the library: scan, classify, transcode, log. Items
//! are handled strictly one after another; the wall-clock budget is checked
//! before each candidate, so a budget of zero hours transcodes nothing.

use crate::classify::{is_info_file, FileClassifier, Inspection};
use crate::event_log::{hostname, local_now, EventKind, EventLog, EventLogError, EventRecord};
use crate::executor::{ExecutorSettings, TranscodeExecutor};
use crate::media::{bytes_to_gb, Category, MediaItem};
use crate::probe::FfprobeProbe;
use crate::retry::RetryPolicy;
use crate::runner::TokioProcessRunner;
use crate::scan::{scan_library, CategoryFilter};
use crate::servarr::{LibrarySync, RadarrSync};
use crate::startup::{run_startup_checks, StartupError};
use crate::state::SentinelStore;
use library_transcoder_config::Config;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error type for run-level failures
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// The event log could not be written
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),
}

/// Per-run knobs
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Wall-clock budget; `None` runs until the scan is exhausted
    pub max_hours: Option<f64>,
    /// Pause after each transcode attempt
    pub cooldown: Duration,
    /// Also transcode items narrower than full HD
    pub include_non_hd: bool,
    pub tv_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_hours: None,
            cooldown: Duration::from_secs(5 * 60),
            include_non_hd: false,
            tv_only: false,
        }
    }
}

impl RunOptions {
    /// Negative `max_hours` means unbounded
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_hours: (cfg.schedule.max_hours >= 0).then_some(cfg.schedule.max_hours as f64),
            cooldown: Duration::from_secs(cfg.schedule.cooldown_mins * 60),
            include_non_hd: cfg.library.include_non_hd,
            tv_only: cfg.library.tv_only,
        }
    }
}

/// Why a discovered file was not transcoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    InfoFile,
    /// No category folder below the category segment
    Uncategorized,
    Transcoding,
    Transcoded,
    NotVideo,
    NotFullHd,
}

/// Result of evaluating one path
#[derive(Debug, Clone)]
pub enum Evaluation {
    Skip(SkipReason),
    Transcode { item: MediaItem, inspection: Inspection },
}

/// A finished transcode
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodedItem {
    pub source: PathBuf,
    pub output: PathBuf,
    pub before_gb: f64,
    pub after_gb: f64,
    pub elapsed: Duration,
}

/// What happened to a candidate the executor was run on
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Transcoded(TranscodedItem),
    /// The source disappeared underneath the run
    Vanished(PathBuf),
    Failed(PathBuf),
}

/// Summary of one run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub transcoded: Vec<TranscodedItem>,
    pub vanished: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    pub skipped: HashMap<SkipReason, usize>,
    /// The wall-clock budget ended the run before the scan did
    pub budget_exhausted: bool,
}

impl RunReport {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Transcoded(item) => self.transcoded.push(item),
            ItemOutcome::Vanished(path) => self.vanished.push(path),
            ItemOutcome::Failed(path) => self.failed.push(path),
        }
    }

    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}

/// True when `hostname` is the configured production host
pub fn is_production_host(cfg: &Config, hostname: &str) -> bool {
    cfg.radarr.production_host.as_deref() == Some(hostname)
}

/// Sequential scan-and-transcode loop
pub struct Orchestrator {
    root: PathBuf,
    classifier: FileClassifier,
    executor: TranscodeExecutor,
    log: EventLog,
    sync: Option<Arc<dyn LibrarySync>>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        root: PathBuf,
        classifier: FileClassifier,
        executor: TranscodeExecutor,
        log: EventLog,
        options: RunOptions,
    ) -> Self {
        Self {
            root,
            classifier,
            executor,
            log,
            sync: None,
            options,
        }
    }

    /// Confirm movie renames with an external library after each transcode
    pub fn with_library_sync(mut self, sync: Arc<dyn LibrarySync>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Wire up the production components from configuration
    ///
    /// This performs the startup sequence:
    /// 1. Run startup checks (library root, docker, log directory) unless skipped
    /// 2. Open this host's event log
    /// 3. Build the ffprobe classifier and the docker executor on sentinel files
    /// 4. Attach Radarr confirmation when this is the production host
    pub fn from_config(cfg: &Config, options: RunOptions, skip_checks: bool) -> Result<Self, OrchestratorError> {
        let host = hostname();
        let log = if skip_checks {
            EventLog::open(&cfg.library.log_dir, &host)?
        } else {
            run_startup_checks(cfg, &host)?
        };

        let store = Arc::new(SentinelStore::new());
        let classifier = FileClassifier::new(Arc::new(FfprobeProbe::new()), store.clone());
        let executor = TranscodeExecutor::new(
            Arc::new(TokioProcessRunner::new()),
            store,
            ExecutorSettings {
                library_root: cfg.library.root_dir.clone(),
                staging_dir: cfg.library.staging_dir.clone(),
                cpu: cfg.cpu.clone(),
                transcoder: cfg.transcoder.clone(),
                retry: RetryPolicy::from_config(&cfg.retry),
            },
        );

        let mut orchestrator = Self::new(cfg.library.root_dir.clone(), classifier, executor, log, options);

        if is_production_host(cfg, &host) {
            match RadarrSync::from_config(&cfg.radarr) {
                Ok(sync) => orchestrator = orchestrator.with_library_sync(Arc::new(sync)),
                Err(e) => warn!(error = %e, "production host without Radarr access, renames will not be confirmed"),
            }
        }

        Ok(orchestrator)
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Decide whether `path` should be transcoded
    ///
    /// Checks in order: sidecar file, category folder, fresh transcode log,
    /// completion marker, video track, full-HD policy.
    pub fn evaluate(&self, path: &Path, now: SystemTime) -> Evaluation {
        if is_info_file(path) {
            return Evaluation::Skip(SkipReason::InfoFile);
        }
        let Some(item) = MediaItem::from_path(path) else {
            return Evaluation::Skip(SkipReason::Uncategorized);
        };

        let inspection = self.classifier.inspect(path);
        if self.classifier.is_transcoding_inspected(&inspection, now) {
            return Evaluation::Skip(SkipReason::Transcoding);
        }
        if self.classifier.is_transcoded_inspected(&inspection) {
            return Evaluation::Skip(SkipReason::Transcoded);
        }
        if !inspection.is_video() {
            return Evaluation::Skip(SkipReason::NotVideo);
        }
        if !self.options.include_non_hd && !inspection.is_full_hd() {
            return Evaluation::Skip(SkipReason::NotFullHd);
        }

        Evaluation::Transcode { item, inspection }
    }

    fn budget_spent(&self, started: Instant) -> bool {
        match self.options.max_hours {
            Some(hours) => started.elapsed().as_secs_f64() >= hours * 3600.0,
            None => false,
        }
    }

    /// Run one pass over the library
    ///
    /// Only event log failures abort the run; every per-item failure is
    /// recorded in the report and the loop moves on.
    pub async fn run(&self) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        let mut report = RunReport::default();

        info!(
            root = %self.root.display(),
            max_hours = ?self.options.max_hours,
            tv_only = self.options.tv_only,
            include_non_hd = self.options.include_non_hd,
            "starting transcode run"
        );

        for path in scan_library(&self.root, CategoryFilter::new(self.options.tv_only)) {
            if self.budget_spent(started) {
                info!("wall-clock budget spent, stopping run");
                report.budget_exhausted = true;
                break;
            }

            let (item, inspection) = match self.evaluate(&path, SystemTime::now()) {
                Evaluation::Skip(reason) => {
                    debug!(path = %path.display(), reason = ?reason, "skipping");
                    report.skip(reason);
                    continue;
                }
                Evaluation::Transcode { item, inspection } => (item, inspection),
            };

            let outcome = self.process(&item, &inspection).await?;
            report.record(outcome);

            if !self.options.cooldown.is_zero() {
                debug!(secs = self.options.cooldown.as_secs(), "cooling down");
                tokio::time::sleep(self.options.cooldown).await;
            }
        }

        info!(
            transcoded = report.transcoded.len(),
            failed = report.failed.len(),
            vanished = report.vanished.len(),
            "transcode run finished"
        );
        Ok(report)
    }

    /// Transcode one item, writing its `start` and `end` rows
    async fn process(&self, item: &MediaItem, inspection: &Inspection) -> Result<ItemOutcome, OrchestratorError> {
        let item_started = Instant::now();

        let before_gb = match item.size_bytes() {
            Ok(bytes) => bytes_to_gb(bytes),
            Err(e) => {
                info!(path = %item.path.display(), error = %e, "item vanished before transcoding");
                return Ok(ItemOutcome::Vanished(item.path.clone()));
            }
        };

        self.log.append_start(&EventRecord::for_item(
            item,
            EventKind::Start,
            before_gb,
            local_now(),
        ))?;

        let output = match self.executor.transcode(inspection).await {
            Ok(output) => output,
            Err(e) if e.is_missing_file() => {
                info!(path = %item.path.display(), error = %e, "item vanished during transcode");
                return Ok(ItemOutcome::Vanished(item.path.clone()));
            }
            Err(e) => {
                error!(path = %item.path.display(), error = %e, "transcode failed");
                return Ok(ItemOutcome::Failed(item.path.clone()));
            }
        };

        let after_gb = match fs::metadata(&output) {
            Ok(meta) => bytes_to_gb(meta.len()),
            Err(e) => {
                warn!(path = %output.display(), error = %e, "could not measure output");
                0.0
            }
        };
        let output_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.log.append_end(&EventRecord {
            timestamp: local_now(),
            kind: EventKind::End,
            category: item.category,
            group: item.group.clone(),
            name: output_name.clone(),
            size_gb: after_gb,
        })?;

        if item.category == Category::Movie {
            if let Some(sync) = &self.sync {
                if let Err(e) = sync.confirm_rename(&item.name, &output_name).await {
                    warn!(file = %output_name, error = %e, "could not confirm rename with library");
                }
            }
        }

        let elapsed = item_started.elapsed();
        info!(
            file = %item.name,
            output = %output_name,
            before_gb,
            after_gb,
            elapsed_secs = elapsed.as_secs(),
            "finished transcoding"
        );

        Ok(ItemOutcome::Transcoded(TranscodedItem {
            source: item.path.clone(),
            output,
            before_gb,
            after_gb,
            elapsed,
        }))
    }
}
