//! playlist-loader library

pub mod backend;
pub mod downloader;
pub mod extractor;
pub mod queue;
pub mod selection;
pub mod utils;

// Re-export main types for easier use
pub use backend::{AggregateCounters, BackendEvent, BackendHandle};
pub use downloader::{DownloadOptions, JobState, JobView, OptionsOverride, Quality};
pub use extractor::{Listing, PlaylistLister, VideoDescriptor, YtDlpExtractor};
pub use queue::JobRegistry;
pub use utils::{AppSettings, LoaderError};
