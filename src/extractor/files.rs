//! File descriptors returned by successful extractions.

use serde::{Deserialize, Serialize};

/// Extensions treated as video when the service does not say.
const VIDEO_EXTENSIONS: [&str; 10] = [
    ".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".3gp", ".ts",
];

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// One file behind a share link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
    pub size_bytes: u64,
    pub is_video: bool,
    /// Direct download link; may be empty when the service withheld it.
    pub direct_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

impl FileDescriptor {
    /// Creates a descriptor, inferring `is_video` from the filename.
    #[must_use]
    pub fn new(filename: impl Into<String>, size_bytes: u64, direct_link: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            is_video: is_video_filename(&filename),
            filename,
            size_bytes,
            direct_link: direct_link.into(),
            thumbnail: None,
            duration_secs: None,
        }
    }

    #[must_use]
    pub fn formatted_size(&self) -> String {
        format_size(self.size_bytes)
    }

    /// `MM:SS` or `HH:MM:SS`; empty when unknown.
    #[must_use]
    pub fn formatted_duration(&self) -> String {
        self.duration_secs.map(format_duration).unwrap_or_default()
    }
}

/// Whether `filename` has a well-known video extension (case-insensitive).
///
/// # Examples
///
/// ```
/// use sharelink_core::extractor::is_video_filename;
///
/// assert!(is_video_filename("Holiday.MP4"));
/// assert!(!is_video_filename("notes.txt"));
/// ```
#[must_use]
pub fn is_video_filename(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Human-readable size with two decimals (`1.50 MB`); `Unknown` for zero.
#[must_use]
pub fn format_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "Unknown".to_string();
    }
    #[allow(clippy::cast_precision_loss)]
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", SIZE_UNITS[unit])
}

/// `MM:SS`, or `HH:MM:SS` from one hour up; empty for zero.
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return String::new();
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}
