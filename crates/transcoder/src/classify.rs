//! Classifier module for deciding what a library file is and what it should be named.
//!
//! Pure predicates over a path and its probe result: sidecar detection,
//! full-HD detection, the quality tag appended to transcoded output, and the
//! canonical "common name" that ties a source file to its transcoded successor.

use crate::probe::{MediaProbe, ProbeResult};
use crate::state::{SentinelKey, StateStore};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Extensions of sidecar files that live next to media and are never transcoded.
pub const INFO_EXTENSIONS: &[&str] = &["jpg", "nfo", "transcodelog", "istranscoded"];

/// Frame width above which a video counts as full HD.
pub const FULL_HD_MIN_WIDTH: u32 = 1900;

/// Substring present in every quality tag; its presence means a name is already tagged.
pub const TAG_MARKER: &str = "WEB-DL-";

/// Quality tag embedded in output names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTag {
    /// First video track wider than [`FULL_HD_MIN_WIDTH`].
    FullHd,
    /// Any other video.
    Hd,
    /// No video track at all.
    None,
}

impl QualityTag {
    /// Derive the tag from probe facts.
    pub fn from_probe(probe: &ProbeResult) -> Self {
        match probe.first_video() {
            Some(video) if video.width > FULL_HD_MIN_WIDTH => QualityTag::FullHd,
            Some(_) => QualityTag::Hd,
            None => QualityTag::None,
        }
    }

    /// Suffix inserted between the stem and the extension.
    pub fn suffix(&self) -> &'static str {
        match self {
            QualityTag::FullHd => " - WEB-DL-1080p",
            QualityTag::Hd => " - WEB-DL-720p",
            QualityTag::None => "",
        }
    }
}

impl fmt::Display for QualityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Known tag suffixes, longest first.
const TAG_SUFFIXES: &[&str] = &[" - WEB-DL-1080p", " - WEB-DL-720p"];

/// Checks if a path is a sidecar (thumbnail, metadata, transcode log or completion marker).
pub fn is_info_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = ext.to_lowercase();
            INFO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// True iff the first video track is wider than [`FULL_HD_MIN_WIDTH`].
pub fn is_full_hd(probe: &ProbeResult) -> bool {
    QualityTag::from_probe(probe) == QualityTag::FullHd
}

/// Checks whether the file name already carries a quality tag.
pub fn has_quality_tag(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().contains(TAG_MARKER))
        .unwrap_or(false)
}

/// The extension-less tagged path shared by a media file's output and sentinels.
///
/// An already tagged name is left as is, so the operation is idempotent.
pub fn sentinel_key(path: &Path, tag: QualityTag) -> SentinelKey {
    let mut base: OsString = path.file_stem().map(|s| s.to_owned()).unwrap_or_default();
    if !has_quality_tag(path) {
        base.push(tag.suffix());
    }

    let base = match path.parent() {
        Some(parent) => parent.join(base),
        None => PathBuf::from(base),
    };
    SentinelKey::new(base)
}

/// Swap the extension, inserting `tag` first unless the name is already tagged.
///
/// `/m/Foo.mkv` with a full-HD tag and `mp4` -> `/m/Foo - WEB-DL-1080p.mp4`;
/// `/m/Foo - WEB-DL-1080p.mkv` -> `/m/Foo - WEB-DL-1080p.mp4`.
pub fn tagged_path(path: &Path, tag: QualityTag, extension: &str) -> PathBuf {
    sentinel_key(path, tag).with_extension(extension)
}

/// Canonical name of an item, used to pair pre- and post-transcode records.
///
/// Strips the extension, then any trailing quality tag:
/// `Foo - WEB-DL-1080p.mp4` and `Foo.mkv` both become `Foo`.
pub fn common_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());

    for suffix in TAG_SUFFIXES {
        if let Some(stripped) = stem.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    stem
}

/// Probe facts gathered once per evaluated file.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub path: PathBuf,
    /// `None` when the probe failed; such files are treated as non-video.
    pub probe: Option<ProbeResult>,
}

impl Inspection {
    pub fn is_video(&self) -> bool {
        self.probe.as_ref().map(ProbeResult::has_video).unwrap_or(false)
    }

    pub fn is_full_hd(&self) -> bool {
        self.probe.as_ref().map(is_full_hd).unwrap_or(false)
    }

    pub fn quality_tag(&self) -> QualityTag {
        self.probe
            .as_ref()
            .map(QualityTag::from_probe)
            .unwrap_or(QualityTag::None)
    }

    pub fn sentinel_key(&self) -> SentinelKey {
        sentinel_key(&self.path, self.quality_tag())
    }

    pub fn tagged_path(&self, extension: &str) -> PathBuf {
        tagged_path(&self.path, self.quality_tag(), extension)
    }
}

/// Path-level classification over a media probe and a state store.
#[derive(Clone)]
pub struct FileClassifier {
    probe: Arc<dyn MediaProbe>,
    store: Arc<dyn StateStore>,
}

impl FileClassifier {
    pub fn new(probe: Arc<dyn MediaProbe>, store: Arc<dyn StateStore>) -> Self {
        Self { probe, store }
    }

    /// Probe the file once. Probe failures are logged and recorded as `None`.
    pub fn inspect(&self, path: &Path) -> Inspection {
        let probe = match self.probe.probe(path) {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "probe failed, treating as non-video");
                None
            }
        };
        Inspection {
            path: path.to_path_buf(),
            probe,
        }
    }

    /// True iff the probe finds at least one video track.
    pub fn is_video(&self, path: &Path) -> bool {
        self.inspect(path).is_video()
    }

    pub fn is_info_file(&self, path: &Path) -> bool {
        is_info_file(path)
    }

    pub fn is_full_hd(&self, path: &Path) -> bool {
        self.inspect(path).is_full_hd()
    }

    pub fn quality_tag(&self, path: &Path) -> QualityTag {
        self.inspect(path).quality_tag()
    }

    /// Tagged path for `extension`; only probes when the name is not yet tagged.
    pub fn tagged_path(&self, path: &Path, extension: &str) -> PathBuf {
        if has_quality_tag(path) {
            return tagged_path(path, QualityTag::None, extension);
        }
        tagged_path(path, self.quality_tag(path), extension)
    }

    /// Completion marker and mp4 output both exist.
    pub fn is_transcoded(&self, path: &Path) -> bool {
        self.store.is_completed(&self.key_for(path))
    }

    /// A transcode log was touched within the liveness window.
    pub fn is_transcoding(&self, path: &Path, now: SystemTime) -> bool {
        self.store.is_in_progress(&self.key_for(path), now)
    }

    pub fn is_transcoded_inspected(&self, inspection: &Inspection) -> bool {
        self.store.is_completed(&inspection.sentinel_key())
    }

    pub fn is_transcoding_inspected(&self, inspection: &Inspection, now: SystemTime) -> bool {
        self.store.is_in_progress(&inspection.sentinel_key(), now)
    }

    fn key_for(&self, path: &Path) -> SentinelKey {
        if has_quality_tag(path) {
            sentinel_key(path, QualityTag::None)
        } else {
            self.inspect(path).sentinel_key()
        }
    }
}

impl fmt::Debug for FileClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileClassifier").finish_non_exhaustive()
    }
}
