//! CPU budget for the transcoding container
//!
//! Grants more cores during the day and fewer in the evening, when the
//! machine is shared with interactive users.

use library_transcoder_config::CpuConfig;

/// Cores granted to one transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuBudget {
    /// Number of cores (pinned as `0..cores`)
    pub cores: u32,
}

impl CpuBudget {
    /// Derive the budget for a local hour of the day (0-23)
    ///
    /// Uses the following rules:
    /// - `day_cores` before `evening_start_hour`, `evening_cores` from then on
    /// - Clamped to `available` logical cores, and never below 1
    pub fn for_hour(hour: u32, cfg: &CpuConfig, available: u32) -> Self {
        let wanted = if hour < cfg.evening_start_hour {
            cfg.day_cores
        } else {
            cfg.evening_cores
        };

        Self {
            cores: wanted.min(available.max(1)).max(1),
        }
    }

    /// Budget for the current local hour on this machine
    pub fn now(cfg: &CpuConfig) -> Self {
        use chrono::Timelike;

        let hour = chrono::Local::now().hour();
        Self::for_hour(hour, cfg, num_cpus::get() as u32)
    }

    /// `--cpuset-cpus` value pinning the first `cores` CPUs, e.g. `0,1,2,3`
    pub fn cpuset(&self) -> String {
        (0..self.cores)
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}
