//! Download jobs: yt-dlp invocation, output parsing and process lifecycle

pub mod job;
pub mod options;
pub mod progress;

// Re-export for convenience
pub use job::{DownloadJob, JobEvent, JobState, JobView};
pub use options::{DownloadOptions, OptionsOverride, Quality};
pub use progress::{JobOutcome, OutputLine, OutputTracker, ProgressUpdate};
