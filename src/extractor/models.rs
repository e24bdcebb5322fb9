//! Data structures for playlist entries

use serde::{Deserialize, Serialize};

/// One playlist entry as reported by a flat listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub title: String,
    /// Identity key across the listing, registry and job events
    pub source_url: String,
    pub duration: Option<u64>,
    pub uploader: String,
    pub view_count: Option<u64>,
}

impl VideoDescriptor {
    pub fn new(title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_url: source_url.into(),
            duration: None,
            uploader: UNKNOWN_UPLOADER.to_string(),
            view_count: None,
        }
    }
}

pub const UNKNOWN_UPLOADER: &str = "Unknown";

/// Raw `-j` entry; every field optional so missing keys are reported, not fatal
#[derive(Debug, Deserialize)]
pub(crate) struct FlatEntry {
    pub title: Option<String>,
    pub url: Option<String>,
    // yt-dlp reports fractional seconds for some extractors
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
}

impl FlatEntry {
    pub(crate) fn into_descriptor(self) -> Option<VideoDescriptor> {
        let title = self.title?;
        let source_url = self.url?;

        Some(VideoDescriptor {
            title,
            source_url,
            duration: self
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(|d| d.round() as u64),
            uploader: self
                .uploader
                .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
            view_count: self.view_count,
        })
    }
}

/// Result of a completed listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub videos: Vec<VideoDescriptor>,
    /// Lines that were not JSON or lacked `title`/`url`
    pub skipped: usize,
}
