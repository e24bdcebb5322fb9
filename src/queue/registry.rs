//! In-flight download registry
//!
//! Maps `source_url` to the handle of the job currently downloading it.
//! Only jobs that are running (or being cancelled) have an entry, so the
//! registry size is the number of active processes.

use crate::extractor::VideoDescriptor;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle for managing an active download
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub video: VideoDescriptor,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn new(video: VideoDescriptor, cancel: CancellationToken) -> Self {
        Self { video, cancel }
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    active: HashMap<String, JobHandle>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Returns false, leaving the existing entry untouched,
    /// when the URL is already in flight.
    pub fn insert(&mut self, handle: JobHandle) -> bool {
        let url = handle.video.source_url.clone();
        if self.active.contains_key(&url) {
            warn!("Job for {} is already registered", url);
            return false;
        }
        debug!("Registered job for {}", url);
        self.active.insert(url, handle);
        true
    }

    pub fn remove(&mut self, url: &str) -> Option<JobHandle> {
        let removed = self.active.remove(url);
        if removed.is_some() {
            debug!("Unregistered job for {}", url);
        }
        removed
    }

    pub fn contains(&self, url: &str) -> bool {
        self.active.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn urls(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// Request cancellation of one job.
    ///
    /// Returns true only for the first request on a registered URL; absent
    /// URLs and repeated requests are no-ops. The entry stays until the job
    /// reports its exit.
    pub fn cancel(&self, url: &str) -> bool {
        match self.active.get(url) {
            Some(handle) if !handle.cancel.is_cancelled() => {
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Request cancellation of every in-flight job, returning the URLs newly cancelled
    pub fn cancel_all(&self) -> Vec<String> {
        self.active
            .iter()
            .filter(|(_, handle)| !handle.cancel.is_cancelled())
            .map(|(url, handle)| {
                handle.cancel.cancel();
                url.clone()
            })
            .collect()
    }
}
