//! HandBrake encoder module for the library transcoder
//!
//! Builds the containerised `HandBrakeCLI` invocation with a fixed
//! codec/quality/audio policy and explicit CPU pinning.

use crate::budget::CpuBudget;
use library_transcoder_config::TranscoderConfig;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Parameters for one containerised HandBrake run
#[derive(Debug, Clone)]
pub struct HandbrakeParams {
    /// Path to the source video file
    pub input_path: PathBuf,
    /// Where HandBrake writes the output (inside the staging mount)
    pub staging_output: PathBuf,
    /// Library root, mounted at the same path inside the container
    pub library_root: PathBuf,
    /// Staging directory, mounted at the same path inside the container
    pub staging_dir: PathBuf,
    /// Cores granted to this run
    pub budget: CpuBudget,
}

/// Identity volume mapping (`host:container` at the same path)
fn volume(path: &Path) -> String {
    format!("{}:{}", path.display(), path.display())
}

/// Build the `docker run ... HandBrakeCLI ...` command
///
/// Creates a Command configured with:
/// - CPU pinning (`--cpuset-cpus 0,..,n-1`) and `--cpus n` from the budget
/// - Library root and staging directory mounted read/write at identical paths
/// - MP4 container, fixed encoder and constant quality
/// - Audio language filter, pass-through for the configured codecs
/// - Variable frame rate, resolution cap, and web optimisation
///
/// # Arguments
/// * `params` - Paths and CPU budget for this run
/// * `cfg` - Fixed encoding policy
///
/// # Returns
/// A configured Command ready for execution
pub fn build_handbrake_command(params: &HandbrakeParams, cfg: &TranscoderConfig) -> Command {
    let mut cmd = Command::new(&cfg.docker_bin);
    cmd.arg("run");

    // Resource isolation
    cmd.arg("--cpuset-cpus").arg(params.budget.cpuset());
    cmd.arg("--cpus").arg(params.budget.cores.to_string());
    cmd.arg("--user").arg(&cfg.user);
    cmd.arg("--name").arg(&cfg.container_name);
    cmd.arg("-p").arg(format!("{}:{}", cfg.web_port, cfg.web_port));
    cmd.arg("-v").arg(volume(&params.library_root));
    cmd.arg("-v").arg(volume(&params.staging_dir));
    cmd.arg("--rm").arg(&cfg.image).arg("HandBrakeCLI");

    // Input and output paths
    cmd.arg("-i").arg(&params.input_path);
    cmd.arg("-o").arg(&params.staging_output);

    // Container, video codec and quality
    cmd.arg("-f").arg("av_mp4");
    cmd.arg("-e").arg(&cfg.encoder);
    cmd.arg("-q").arg(cfg.quality.to_string());

    // Audio: language filter, copy-through for known codecs, re-encode the rest
    cmd.arg("--audio-lang-list").arg(cfg.audio_languages.join(","));
    cmd.arg("--vfr");
    let copy_codecs = cfg
        .audio_copy_codecs
        .iter()
        .map(|c| format!("copy:{}", c))
        .collect::<Vec<_>>()
        .join(",");
    cmd.arg("-E").arg(copy_codecs);

    // Resolution cap
    cmd.arg("-Y").arg(cfg.max_height.to_string());
    cmd.arg("-X").arg(cfg.max_width.to_string());

    cmd.arg("--optimize");

    cmd
}
