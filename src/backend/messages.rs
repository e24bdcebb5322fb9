use crate::downloader::{DownloadOptions, JobState, JobView, OptionsOverride};
use crate::extractor::{Listing, VideoDescriptor};
use crate::utils::error::LoaderError;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Aggregate download tallies
///
/// `active` mirrors the registry size. The finished tallies only grow until a
/// new listing or an explicit clear resets them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounters {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub active: usize,
}

impl AggregateCounters {
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Commands sent from the front-end to the backend
#[derive(Debug)]
pub enum BackendCommand {
    // Listing
    ListPlaylist {
        url: String,
        reply: oneshot::Sender<Result<Listing, LoaderError>>,
    },
    SelectVideos {
        expr: String,
        reply: oneshot::Sender<Result<Vec<VideoDescriptor>, LoaderError>>,
    },
    SetOverride {
        url: String,
        options: OptionsOverride,
        reply: oneshot::Sender<Result<(), LoaderError>>,
    },

    // Downloads
    StartAll {
        options: DownloadOptions,
        reply: oneshot::Sender<Result<usize, LoaderError>>,
    },
    StartOne {
        url: String,
        options: DownloadOptions,
        reply: oneshot::Sender<Result<bool, LoaderError>>,
    },
    CancelOne {
        url: String,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },

    // Queries
    Counters {
        reply: oneshot::Sender<AggregateCounters>,
    },
    Job {
        url: String,
        reply: oneshot::Sender<Option<JobView>>,
    },
    Jobs {
        reply: oneshot::Sender<Vec<JobView>>,
    },

    // System
    Clear {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Events sent from the backend to the front-end
#[derive(Debug, Clone)]
pub enum BackendEvent {
    // Listing
    ListingStarted {
        url: String,
    },
    /// Emitted per entry while the listing is still running (1-based index)
    VideoListed {
        index: usize,
        video: VideoDescriptor,
    },
    ListingFinished {
        url: String,
        count: usize,
        skipped: usize,
    },
    ListingFailed {
        url: String,
        error: String,
    },

    // Download life-cycle
    DownloadStarted {
        url: String,
        title: String,
        options: DownloadOptions,
    },
    DownloadProgress {
        url: String,
        progress: f64,
        speed: Option<String>,
        eta: Option<String>,
    },
    DownloadStatus {
        url: String,
        text: String,
    },
    DownloadCancelling {
        url: String,
    },
    DownloadFinished {
        url: String,
        title: String,
        state: JobState,
    },

    // Aggregate
    CountersChanged(AggregateCounters),
    /// The last in-flight job finished
    AllIdle,
}
