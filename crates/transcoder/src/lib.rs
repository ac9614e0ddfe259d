//! Library Transcoder
//!
//! Scans a media library, re-encodes eligible videos through a containerised
//! HandBrake, tracks per-file state in sentinel files, and logs before/after
//! sizes for storage-savings reporting.

pub mod budget;
pub mod classify;
pub mod encode;
pub mod event_log;
pub mod executor;
pub mod media;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod promote;
pub mod report;
pub mod retry;
pub mod runner;
pub mod savings;
pub mod scan;
pub mod servarr;
pub mod startup;
pub mod state;

pub use library_transcoder_config as config;
pub use library_transcoder_config::{Config, ConfigError};
pub use budget::CpuBudget;
pub use classify::{common_name, is_info_file, tagged_path, FileClassifier, Inspection, QualityTag};
pub use encode::{build_handbrake_command, HandbrakeParams};
pub use event_log::{hostname, EventKind, EventLog, EventLogError, EventRecord};
pub use executor::{ExecutorSettings, TranscodeError, TranscodeExecutor};
pub use media::{Category, MediaItem};
pub use notify::{NotifyError, WebhookNotifier};
pub use orchestrator::{
    is_production_host, ItemOutcome, Orchestrator, OrchestratorError, RunOptions, RunReport,
    SkipReason, TranscodedItem,
};
pub use probe::{FfprobeProbe, MediaProbe, ProbeError, ProbeResult};
pub use promote::{promote, PromoteError};
pub use report::{Progress, StatusDigest};
pub use retry::RetryPolicy;
pub use runner::{ProcessExit, ProcessRunner, TokioProcessRunner};
pub use savings::{aggregate, aggregate_dir, SavingsError, SavingsRecord, SavingsSummary};
pub use scan::{scan, scan_library, CategoryFilter};
pub use servarr::{LibrarySync, RadarrClient, RadarrSync, ServarrError, SonarrClient};
pub use startup::{run_startup_checks, StartupError};
pub use state::{MemoryStateStore, SentinelKey, SentinelStore, StateStore};
