//! Status digest for the media center
//!
//! Collects transcoding progress, storage savings, download completeness and
//! disk usage into a fixed-width text block suitable for a chat message.

use crate::classify::is_info_file;
use crate::media::Category;
use crate::savings::{aggregate_dir, SavingsSummary};
use crate::servarr::{RadarrClient, SonarrClient};
use crate::state::COMPLETION_EXTENSION;
use library_transcoder_config::Config;
use std::fmt::{self, Write as _};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Extensions counted as library videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "wmv", "avi", "m2ts", "ts", "m4v"];

/// Inner width of a progress bar.
pub const BAR_WIDTH: usize = 15;

/// Width of the dashed rules around block titles.
pub const BLOCK_WIDTH: usize = 39;

const BYTES_PER_TB: f64 = 1_099_511_627_776.0;

/// A done/total counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        percent(self.done as f64, self.total as f64)
    }

    pub fn bar(&self) -> String {
        progress_bar(&format!("({}/{})", self.done, self.total), self.percent())
    }
}

/// Used and total capacity of a mount, in TB rounded to one decimal
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskUsage {
    pub used_tb: f64,
    pub total_tb: f64,
}

impl DiskUsage {
    pub fn from_bytes(used: u64, total: u64) -> Self {
        let tb = |b: u64| (b as f64 / BYTES_PER_TB * 10.0).round() / 10.0;
        Self {
            used_tb: tb(used),
            total_tb: tb(total),
        }
    }

    pub fn percent(&self) -> f64 {
        percent(self.used_tb, self.total_tb)
    }

    pub fn bar(&self) -> String {
        progress_bar(&format!("({:.1}/{:.1})", self.used_tb, self.total_tb), self.percent())
    }
}

fn percent(done: f64, total: f64) -> f64 {
    if total > 0.0 {
        100.0 * done / total
    } else {
        0.0
    }
}

/// `[======>        ] (7/15)        46.67%`
pub fn progress_bar(counter: &str, percent: f64) -> String {
    let step = 100.0 / BAR_WIDTH as f64;
    let filled = (percent / step).trunc();
    let equals = (filled - 1.0).max(0.0) as usize;
    let spaces = (BAR_WIDTH as f64 - filled)
        .clamp(0.0, (BAR_WIDTH - 1) as f64) as usize;

    format!(
        "[{}>{}] {:<14}{:>6}",
        "=".repeat(equals),
        " ".repeat(spaces),
        counter,
        format!("{:.2}%", percent)
    )
}

/// Count video files under `root/<category>` and how many carry a completion marker
pub fn transcoding_status(root: &Path, category: Category) -> Progress {
    let mut progress = Progress::default();

    let videos = WalkDir::new(root.join(category.as_str()))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| !is_info_file(p) && is_video_file(p));

    for path in videos {
        progress.total += 1;
        if path.with_extension(COMPLETION_EXTENSION).is_file() {
            progress.done += 1;
        }
    }
    progress
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Usage of the disk holding `mount`, or `None` if no disk matches
pub fn disk_usage(mount: &Path) -> Option<DiskUsage> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| mount.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| {
            let total = d.total_space();
            DiskUsage::from_bytes(total.saturating_sub(d.available_space()), total)
        })
}

/// Everything shown in the digest; empty sections are left out
#[derive(Debug, Clone, Default)]
pub struct StatusDigest {
    pub transcoding: Vec<(String, Progress)>,
    pub savings: Option<SavingsSummary>,
    pub downloads: Vec<(String, Progress)>,
    pub disks: Vec<(String, DiskUsage)>,
}

impl StatusDigest {
    /// Gather every section. Sources that fail are logged and left empty.
    pub async fn collect(cfg: &Config) -> Self {
        let root = &cfg.library.root_dir;
        let mut digest = Self {
            transcoding: vec![
                ("Movies".to_string(), transcoding_status(root, Category::Movie)),
                ("TV".to_string(), transcoding_status(root, Category::Tv)),
            ],
            ..Self::default()
        };

        match aggregate_dir(&cfg.library.log_dir) {
            Ok(summary) => digest.savings = Some(summary),
            Err(e) => warn!(error = %e, "skipping savings summary"),
        }

        match RadarrClient::new(&cfg.radarr) {
            Ok(client) => match client.download_counts().await {
                Ok(movies) => digest.downloads.push(("Movies".to_string(), movies)),
                Err(e) => warn!(error = %e, "skipping movie download status"),
            },
            Err(e) => warn!(error = %e, "skipping movie download status"),
        }

        match SonarrClient::new(&cfg.sonarr) {
            Ok(client) => match client.download_counts().await {
                Ok((episodes, series)) => {
                    digest.downloads.push(("Episodes".to_string(), episodes));
                    digest.downloads.push(("Series".to_string(), series));
                }
                Err(e) => warn!(error = %e, "skipping TV download status"),
            },
            Err(e) => warn!(error = %e, "skipping TV download status"),
        }

        for mount in &cfg.report.mounts {
            match disk_usage(mount) {
                Some(usage) => digest.disks.push((mount.display().to_string(), usage)),
                None => warn!(mount = %mount.display(), "no disk found for mount"),
            }
        }

        digest
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        let transcoding: Vec<_> = self.transcoding.iter().map(|(n, p)| (n.as_str(), p.bar())).collect();
        info_block(&mut out, "Transcoding Status", &transcoding);

        if let Some(savings) = &self.savings {
            let _ = writeln!(out, "Total Storage Saved: {:.2} TB", savings.total_savings_tb);
            let _ = writeln!(
                out,
                "Average Savings per Item: {:.2}%",
                savings.mean_savings_ratio.unwrap_or(0.0) * 100.0
            );
        }

        let downloads: Vec<_> = self.downloads.iter().map(|(n, p)| (n.as_str(), p.bar())).collect();
        info_block(&mut out, "Download Status", &downloads);

        let disks: Vec<_> = self.disks.iter().map(|(n, d)| (n.as_str(), d.bar())).collect();
        info_block(&mut out, "HDD Status", &disks);

        out
    }
}

impl fmt::Display for StatusDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn info_block(out: &mut String, title: &str, rows: &[(&str, String)]) {
    if rows.is_empty() {
        return;
    }
    let rule = "-".repeat(BLOCK_WIDTH);
    let _ = writeln!(out, "{}\n{}:\n{}", rule, title, rule);
    for (name, bar) in rows {
        let _ = writeln!(out, "{}:\n{}", name, bar);
    }
    out.push('\n');
}
