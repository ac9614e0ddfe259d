//! CLI entry point for the library transcoder
//!
//! Parses command line arguments, loads configuration and dispatches to the
//! transcode run, the savings summary, or the status digest.

use clap::{Parser, Subcommand};
use library_transcoder::{
    aggregate_dir, Config, Orchestrator, RunOptions, StatusDigest, WebhookNotifier,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Library Transcoder - shrink a media library one file at a time
#[derive(Parser, Debug)]
#[command(name = "library-transcoder")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the library and transcode eligible files
    Transcode {
        /// Library root containing `movies/` and `tv/`
        #[arg(long)]
        root_dir: Option<PathBuf>,

        /// Directory for the per-host event logs
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Wall-clock budget in hours; -1 runs until the scan is exhausted
        #[arg(short = 't', long = "max-hours", allow_hyphen_values = true)]
        max_hours: Option<i64>,

        /// Only consider `tv/` content
        #[arg(long)]
        tv_only: bool,

        /// Also transcode items below full HD
        #[arg(long)]
        include_non_hd: bool,

        /// Pause between transcodes, in minutes
        #[arg(long)]
        cooldown_mins: Option<u64>,

        /// Skip startup checks (docker, library root). For testing only.
        #[arg(long, default_value = "false")]
        skip_checks: bool,
    },

    /// Print storage savings computed from the event logs
    Savings {
        /// Directory holding the per-host event logs
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Print the media center status digest
    Stats {
        /// Also post the digest to the configured webhook
        #[arg(long)]
        notify: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, library_transcoder::ConfigError> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::from_env()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let mut config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Commands::Transcode {
            root_dir,
            log_dir,
            max_hours,
            tv_only,
            include_non_hd,
            cooldown_mins,
            skip_checks,
        } => {
            if let Some(root_dir) = root_dir {
                config.library.root_dir = root_dir;
            }
            if let Some(log_dir) = log_dir {
                config.library.log_dir = log_dir;
            }
            if let Some(max_hours) = max_hours {
                config.schedule.max_hours = max_hours;
            }
            if let Some(cooldown_mins) = cooldown_mins {
                config.schedule.cooldown_mins = cooldown_mins;
            }
            config.library.tv_only |= tv_only;
            config.library.include_non_hd |= include_non_hd;

            if skip_checks {
                warn!("Skipping startup checks (--skip-checks enabled)");
            }

            let options = RunOptions::from_config(&config);
            let orchestrator = match Orchestrator::from_config(&config, options, skip_checks) {
                Ok(orchestrator) => orchestrator,
                Err(e) => {
                    error!("Failed to start transcode run: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            info!(
                log = %orchestrator.event_log().path().display(),
                cooldown_secs = orchestrator.options().cooldown.as_secs(),
                "transcoder ready"
            );

            match orchestrator.run().await {
                Ok(report) => {
                    println!(
                        "Transcoded {} item(s), {} failed, {} vanished{}",
                        report.transcoded.len(),
                        report.failed.len(),
                        report.vanished.len(),
                        if report.budget_exhausted {
                            " (time budget reached)"
                        } else {
                            ""
                        }
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Transcode run aborted: {}", e);
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Savings { log_dir } => {
            let log_dir = log_dir.unwrap_or(config.library.log_dir);
            match aggregate_dir(&log_dir) {
                Ok(summary) => {
                    println!("{}", summary);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Failed to compute savings: {}", e);
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Stats { notify } => {
            let digest = StatusDigest::collect(&config).await.render();
            println!("{}", digest);

            if !notify {
                return ExitCode::SUCCESS;
            }

            let result = match WebhookNotifier::from_config(&config.notify) {
                Ok(notifier) => notifier.post(&digest).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("Failed to post status digest: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
