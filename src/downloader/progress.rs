//! Interpretation of yt-dlp's human-readable progress output
//!
//! Lines are classified one at a time as they stream in. [`OutputTracker`]
//! accumulates what is needed for the final verdict (success markers, the
//! last error line) without keeping the whole transcript.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// [download]  42.3% of ~ 12.34MiB at  1.20MiB/s ETA 00:09 (frag 3/40)
static PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid regex"));
static SPEED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bat\s+(~?\s*\d+(?:\.\d+)?\s*[KMGT]?i?B/s)").expect("valid regex"));
static ETA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bETA\s+(\d[\d:]*)").expect("valid regex"));
static POSTPROCESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(ExtractAudio|Merger|ffmpeg|VideoConvertor|VideoRemuxer|Fixup\w*)\]")
        .expect("valid regex")
});
static WARNING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)error|failed|unable").expect("valid regex"));
static SUCCESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\[download\]\s+100(?:\.0+)?%",
        r"|\[ExtractAudio\] Destination:",
        r"|\[ffmpeg\] Destination:",
        r"|\[Merger\] Merging formats into",
    ))
    .expect("valid regex")
});

/// A parsed `[download] NN.N%` line
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Fraction in `[0, 1]`
    pub fraction: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

/// What a single output line means for the job
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(ProgressUpdate),
    /// Post-processing step (audio extraction, muxing)
    Processing(String),
    /// Looks like a problem; the tool may still succeed afterwards
    Warning(String),
    /// Anything else, passed through for observability
    Info(String),
    Blank,
}

/// Classify one line, trying progress, post-processing, error keywords, then raw text
pub fn classify_line(line: &str) -> OutputLine {
    let line = line.trim();
    if line.is_empty() {
        return OutputLine::Blank;
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        if let Ok(percent) = caps[1].parse::<f64>() {
            return OutputLine::Progress(ProgressUpdate {
                fraction: (percent / 100.0).clamp(0.0, 1.0),
                speed: SPEED_RE
                    .captures(line)
                    .map(|c| c[1].split_whitespace().collect::<String>()),
                eta: ETA_RE.captures(line).map(|c| c[1].to_string()),
            });
        }
    }

    if POSTPROCESS_RE.is_match(line) {
        return OutputLine::Processing(line.to_string());
    }

    if WARNING_RE.is_match(line) {
        return OutputLine::Warning(line.to_string());
    }

    OutputLine::Info(line.to_string())
}

/// Output that proves the media was retrieved even when the exit code says otherwise
pub fn is_success_marker(line: &str) -> bool {
    SUCCESS_RE.is_match(line)
}

/// Lines yt-dlp uses to report a fatal problem
pub fn is_error_marker(line: &str) -> bool {
    line.contains("ERROR")
}

/// Terminal result of one download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    /// Stopped on request without producing the media
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

/// Per-job accumulator over the streamed output
#[derive(Debug, Clone, Default)]
pub struct OutputTracker {
    progress: f64,
    success_marker_seen: bool,
    last_error: Option<String>,
    last_status: String,
}

impl OutputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns the classification when it should be surfaced;
    /// progress that does not move forward is dropped to avoid flicker.
    pub fn observe(&mut self, line: &str) -> Option<OutputLine> {
        let trimmed = line.trim();

        if is_success_marker(trimmed) {
            self.success_marker_seen = true;
        }
        if is_error_marker(trimmed) {
            self.last_error = Some(trimmed.to_string());
        }

        let classified = classify_line(trimmed);
        match &classified {
            OutputLine::Blank => return None,
            OutputLine::Progress(update) => {
                if update.fraction <= self.progress {
                    return None;
                }
                self.progress = update.fraction;
            }
            OutputLine::Processing(_) | OutputLine::Warning(_) | OutputLine::Info(_) => {}
        }

        self.last_status = trimmed.to_string();
        Some(classified)
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn last_status(&self) -> &str {
        &self.last_status
    }

    /// Decide the outcome once the process has exited.
    ///
    /// `exit_code` is `None` when the process was ended by a signal.
    pub fn verdict(&mut self, exit_code: Option<i32>, cancel_requested: bool) -> JobOutcome {
        if exit_code == Some(0) || self.success_marker_seen {
            self.progress = 1.0;
            return JobOutcome::Succeeded;
        }

        if cancel_requested {
            return JobOutcome::Cancelled;
        }

        let reason = match (&self.last_error, exit_code) {
            (Some(line), _) => line.clone(),
            (None, Some(code)) => format!("exit code {}", code),
            (None, None) => "terminated by signal".to_string(),
        };
        JobOutcome::Failed(reason)
    }
}
