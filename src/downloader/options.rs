//! Per-download options and the yt-dlp invocation they produce

use crate::extractor::VideoDescriptor;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;

/// Video quality options
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    Best,
    Q1080,
    Q720,
    Q480,
    /// A yt-dlp format selector passed through verbatim
    Custom(String),
}

impl Quality {
    /// Format selector handed to `-f`
    pub fn selector(&self) -> String {
        match self {
            Quality::Best => "best[ext=mp4]".to_string(),
            Quality::Q1080 => "best[height<=1080]".to_string(),
            Quality::Q720 => "best[height<=720]".to_string(),
            Quality::Q480 => "best[height<=480]".to_string(),
            Quality::Custom(selector) => selector.clone(),
        }
    }

    /// Get string representation for display
    pub fn label(&self) -> String {
        match self {
            Quality::Best => "Best Quality".to_string(),
            Quality::Q1080 => "1080p".to_string(),
            Quality::Q720 => "720p".to_string(),
            Quality::Q480 => "480p".to_string(),
            Quality::Custom(selector) => format!("Custom: {}", selector),
        }
    }

    /// Parse the CLI spelling: `best`, `1080`/`1080p`, `720`, `480`, or anything else as custom
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().trim_end_matches('p') {
            "" | "best" => Quality::Best,
            "1080" => Quality::Q1080,
            "720" => Quality::Q720,
            "480" => Quality::Q480,
            _ => Quality::Custom(input.trim().to_string()),
        }
    }
}

/// Options a single job runs with
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub audio_only: bool,
    pub quality: Quality,
}

/// Per-video adjustments layered over the global options
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptionsOverride {
    pub audio_only: bool,
    pub quality: Option<Quality>,
}

impl DownloadOptions {
    /// Combine global options with a per-video override.
    ///
    /// `audio_only` set at either level forces audio extraction; the
    /// per-video quality wins when present.
    pub fn resolve(global: &DownloadOptions, per_video: Option<&OptionsOverride>) -> Self {
        match per_video {
            None => global.clone(),
            Some(item) => Self {
                audio_only: global.audio_only || item.audio_only,
                quality: item.quality.clone().unwrap_or_else(|| global.quality.clone()),
            },
        }
    }

    /// Format selector for this job. A custom selector is always honoured;
    /// otherwise audio-only jobs fetch the best audio stream.
    pub fn format_selector(&self) -> String {
        match (&self.quality, self.audio_only) {
            (Quality::Custom(selector), _) => selector.clone(),
            (_, true) => AUDIO_SELECTOR.to_string(),
            (quality, false) => quality.selector(),
        }
    }

    pub fn describe(&self) -> String {
        if self.audio_only {
            format!("{} (audio only, mp3)", self.quality.label())
        } else {
            self.quality.label()
        }
    }
}

const AUDIO_SELECTOR: &str = "bestaudio[ext=m4a]/bestaudio";

/// Output template, `<dir>/%(title)s.%(ext)s`
pub fn output_template(directory: &Path) -> OsString {
    directory.join("%(title)s.%(ext)s").into_os_string()
}

/// Arguments for one download, excluding the program itself
pub fn download_args(
    video: &VideoDescriptor,
    options: &DownloadOptions,
    directory: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--newline".into(),
        "--progress".into(),
        "--no-playlist".into(),
        "-o".into(),
        output_template(directory),
        "-f".into(),
        options.format_selector().into(),
    ];

    if options.audio_only {
        args.extend(["--extract-audio", "--audio-format", "mp3"].map(OsString::from));
    }

    args.push(video.source_url.clone().into());
    args
}
