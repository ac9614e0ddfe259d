//! Media probe for collecting track metadata.
//!
//! Wraps `ffprobe` behind the [`MediaProbe`] trait so classification can be
//! exercised against canned results.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe ran but rejected the file.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Information about a video track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoStream {
    /// Codec name (e.g., "hevc", "h264").
    pub codec_name: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

/// Codecs that only ever carry still pictures.
const STILL_IMAGE_CODECS: &[&str] = &["png", "bmp", "webp", "tiff"];

/// Codecs that carry stills unless the stream has more than one frame.
const SINGLE_FRAME_IMAGE_CODECS: &[&str] = &["mjpeg", "gif"];

/// Result of probing a media file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    /// Moving-picture tracks in container order; stills and cover art excluded.
    pub video_streams: Vec<VideoStream>,
}

impl ProbeResult {
    /// The first video track, if any.
    pub fn first_video(&self) -> Option<&VideoStream> {
        self.video_streams.first()
    }

    pub fn has_video(&self) -> bool {
        !self.video_streams.is_empty()
    }
}

/// Source of track metadata for a file.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError>;
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        /// ffprobe reports frame counts as strings.
        pub nb_frames: Option<String>,
        pub disposition: Option<Disposition>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Disposition {
        #[serde(default)]
        pub attached_pic: u8,
    }
}

impl ffprobe_json::Stream {
    /// Whether this `video` stream is really a picture: embedded cover art or a still image.
    fn is_still_image(&self) -> bool {
        if self
            .disposition
            .as_ref()
            .is_some_and(|d| d.attached_pic != 0)
        {
            return true;
        }

        let codec = self.codec_name.as_deref().unwrap_or("");
        if STILL_IMAGE_CODECS.contains(&codec) {
            return true;
        }
        if SINGLE_FRAME_IMAGE_CODECS.contains(&codec) {
            let frames = self
                .nb_frames
                .as_deref()
                .and_then(|n| n.parse::<u64>().ok());
            return frames.map_or(true, |n| n <= 1);
        }
        false
    }
}

/// [`MediaProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: String,
}

impl FfprobeProbe {
    pub fn new() -> Self {
        Self {
            binary: "ffprobe".to_string(),
        }
    }

    /// Use a specific ffprobe binary instead of the one on `PATH`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaProbe for FfprobeProbe {
    /// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <path>`
    /// and parses the JSON output.
    fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&stdout)
    }
}

/// Parses ffprobe JSON output into a ProbeResult.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let mut result = ProbeResult::default();

    for stream in ffprobe.streams.unwrap_or_default() {
        if stream.codec_type.as_deref() != Some("video") || stream.is_still_image() {
            continue;
        }
        result.video_streams.push(VideoStream {
            codec_name: stream.codec_name.unwrap_or_default(),
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
        });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_ignores_other_streams() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 800},
                {"codec_type": "audio", "codec_name": "ac3", "channels": 6},
                {"codec_type": "subtitle", "codec_name": "subrip"}
            ],
            "format": {"duration": "5400.0", "size": "4000000000"}
        }"#;

        let result = parse_ffprobe_output(json).unwrap();

        assert_eq!(result.video_streams.len(), 1);
        assert_eq!(result.video_streams[0].width, 1920);
        assert_eq!(result.video_streams[0].codec_name, "h264");
        assert!(result.has_video());
    }

    #[test]
    fn test_parse_audio_only() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "flac"}]}"#;
        let result = parse_ffprobe_output(json).unwrap();
        assert!(!result.has_video());
        assert!(result.first_video().is_none());
    }

    #[test]
    fn test_parse_still_image_is_not_video() {
        let json = r#"{"streams": [
            {"codec_type": "video", "codec_name": "png", "width": 1920, "height": 1080}
        ]}"#;
        let result = parse_ffprobe_output(json).unwrap();
        assert!(!result.has_video());

        let json = r#"{"streams": [
            {"codec_type": "video", "codec_name": "mjpeg", "width": 1920, "height": 1080, "nb_frames": "1"}
        ]}"#;
        assert!(!parse_ffprobe_output(json).unwrap().has_video());
    }

    #[test]
    fn test_parse_cover_art_is_not_video() {
        let json = r#"{"streams": [
            {"codec_type": "audio", "codec_name": "mp3"},
            {"codec_type": "video", "codec_name": "mjpeg", "width": 600, "height": 600,
             "disposition": {"default": 0, "attached_pic": 1}}
        ]}"#;
        assert!(!parse_ffprobe_output(json).unwrap().has_video());
    }

    #[test]
    fn test_parse_motion_jpeg_is_video() {
        let json = r#"{"streams": [
            {"codec_type": "video", "codec_name": "mjpeg", "width": 1280, "height": 720,
             "nb_frames": "5400", "disposition": {"attached_pic": 0}}
        ]}"#;
        let result = parse_ffprobe_output(json).unwrap();
        assert!(result.has_video());
        assert_eq!(result.first_video().unwrap().width, 1280);
    }

    #[test]
    fn test_parse_missing_streams_is_empty() {
        let result = parse_ffprobe_output("{}").unwrap();
        assert_eq!(result, ProbeResult::default());
    }

    #[test]
    fn test_parse_garbage_is_parse_error() {
        let result = parse_ffprobe_output("not json");
        assert!(matches!(result, Err(ProbeError::ParseError(_))));
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let probe = FfprobeProbe::with_binary("/nonexistent/ffprobe-binary");
        let result = probe.probe(Path::new("/tmp/whatever.mkv"));
        assert!(matches!(result, Err(ProbeError::Io(_))));
    }
}
