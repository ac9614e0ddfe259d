//! Media item identity derived from a library path.

use crate::classify::common_name;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Bytes per gigabyte as used in the event log (binary, 2^30).
pub const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// Library category, inferred from a `movies` or `tv` path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Movie,
    Tv,
}

impl Category {
    /// Directory segment (and event log `Type` column) for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Movie => "movies",
            Category::Tv => "tv",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "movies" => Some(Category::Movie),
            "tv" => Some(Category::Tv),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file in the library, re-derived from its path on every scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub path: PathBuf,
    pub category: Category,
    /// Folder directly below the category segment (movie folder or series).
    pub group: String,
    /// File basename.
    pub name: String,
}

impl MediaItem {
    /// Derive identity from the first `movies`/`tv` segment of `path`.
    ///
    /// Returns `None` when no category segment (or nothing below it) exists.
    pub fn from_path(path: &Path) -> Option<Self> {
        let segments: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        let (idx, category) = segments
            .iter()
            .enumerate()
            .find_map(|(i, s)| Category::from_segment(s).map(|c| (i, c)))?;

        let group = segments.get(idx + 1)?.clone();
        let name = path.file_name()?.to_string_lossy().into_owned();

        Some(Self {
            path: path.to_path_buf(),
            category,
            group,
            name,
        })
    }

    pub fn common_name(&self) -> String {
        common_name(&self.name)
    }

    /// Current size on disk.
    pub fn size_bytes(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}

/// Size in gigabytes, as written to the event log.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_item() {
        let item = MediaItem::from_path(Path::new("/media/movies/Foo (2020)/Foo (2020).mkv")).unwrap();
        assert_eq!(item.category, Category::Movie);
        assert_eq!(item.group, "Foo (2020)");
        assert_eq!(item.name, "Foo (2020).mkv");
        assert_eq!(item.common_name(), "Foo (2020)");
    }

    #[test]
    fn test_tv_item_group_is_series_folder() {
        let item =
            MediaItem::from_path(Path::new("/media/tv/Show/Season 1/Show S01E01 - WEB-DL-720p.mp4"))
                .unwrap();
        assert_eq!(item.category, Category::Tv);
        assert_eq!(item.group, "Show");
        assert_eq!(item.common_name(), "Show S01E01");
    }

    #[test]
    fn test_first_category_segment_wins() {
        let item = MediaItem::from_path(Path::new("/srv/tv/movies/Foo.mkv")).unwrap();
        assert_eq!(item.category, Category::Tv);
        assert_eq!(item.group, "movies");
    }

    #[test]
    fn test_no_category_segment() {
        assert!(MediaItem::from_path(Path::new("/media/music/album/track.flac")).is_none());
        assert!(MediaItem::from_path(Path::new("/media/movies")).is_none());
    }

    #[test]
    fn test_segment_must_match_exactly() {
        assert!(MediaItem::from_path(Path::new("/media/mytv/Show/ep.mkv")).is_none());
    }

    #[test]
    fn test_bytes_to_gb() {
        assert!((bytes_to_gb(10 * 1_073_741_824) - 10.0).abs() < 1e-9);
        assert_eq!(bytes_to_gb(0), 0.0);
    }
}
