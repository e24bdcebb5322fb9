use super::messages::{AggregateCounters, BackendCommand, BackendEvent};
use crate::downloader::{
    DownloadJob, DownloadOptions, JobEvent, JobOutcome, JobState, JobView, OptionsOverride,
    OutputLine,
};
use crate::extractor::{Listing, PlaylistLister, VideoDescriptor, YtDlpExtractor};
use crate::queue::{JobHandle, JobRegistry};
use crate::selection::parse_selection;
use crate::utils::config::AppSettings;
use crate::utils::error::LoaderError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Messages from a running listing back to the actor
#[derive(Debug)]
enum ListingMessage {
    Entry(VideoDescriptor),
    Done {
        url: String,
        result: Result<Listing, LoaderError>,
        reply: oneshot::Sender<Result<Listing, LoaderError>>,
    },
}

/// Single owner of the playlist, the job registry and the counters
///
/// Commands arrive from [`super::BackendHandle`]s; job tasks and the listing
/// task report back over internal channels. No state here is shared.
pub struct BackendActor {
    receiver: mpsc::Receiver<BackendCommand>,
    sender: mpsc::UnboundedSender<BackendEvent>,

    // Components
    settings: AppSettings,
    lister: Arc<dyn PlaylistLister>,
    tool: YtDlpExtractor,

    job_tx: mpsc::UnboundedSender<JobEvent>,
    job_rx: mpsc::UnboundedReceiver<JobEvent>,
    listing_tx: mpsc::UnboundedSender<ListingMessage>,
    listing_rx: mpsc::UnboundedReceiver<ListingMessage>,

    // State
    videos: Vec<VideoDescriptor>,
    selection: Vec<usize>,
    overrides: HashMap<String, OptionsOverride>,
    registry: JobRegistry,
    views: HashMap<String, JobView>,
    counters: AggregateCounters,
    /// Set once a listing succeeds, even when it produced no videos
    playlist_loaded: bool,
    listing_in_progress: bool,
    streamed_entries: usize,
    /// In-flight jobs abandoned by `clear`; their results are not tallied
    discarded: HashSet<String>,
}

impl BackendActor {
    pub fn new(
        settings: AppSettings,
        lister: Arc<dyn PlaylistLister>,
        receiver: mpsc::Receiver<BackendCommand>,
        sender: mpsc::UnboundedSender<BackendEvent>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (listing_tx, listing_rx) = mpsc::unbounded_channel();
        let tool = YtDlpExtractor::new(settings.ytdlp_path.clone());

        Self {
            receiver,
            sender,
            settings,
            lister,
            tool,
            job_tx,
            job_rx,
            listing_tx,
            listing_rx,
            videos: Vec::new(),
            selection: Vec::new(),
            overrides: HashMap::new(),
            registry: JobRegistry::new(),
            views: HashMap::new(),
            counters: AggregateCounters::default(),
            playlist_loaded: false,
            listing_in_progress: false,
            streamed_entries: 0,
            discarded: HashSet::new(),
        }
    }

    pub async fn run(mut self) {
        info!("BackendActor started (lister: {})", self.lister.id());

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(BackendCommand::Shutdown { reply }) => {
                        info!("BackendActor shutting down");
                        self.registry.cancel_all();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        info!("All backend handles dropped, stopping");
                        self.registry.cancel_all();
                        break;
                    }
                },
                Some(event) = self.job_rx.recv() => self.handle_job_event(event),
                Some(message) = self.listing_rx.recv() => self.handle_listing(message),
            }
        }
    }

    fn handle_command(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::ListPlaylist { url, reply } => self.start_listing(url, reply),
            BackendCommand::SelectVideos { expr, reply } => {
                let _ = reply.send(self.select_videos(&expr));
            }
            BackendCommand::SetOverride {
                url,
                options,
                reply,
            } => {
                let _ = reply.send(self.set_override(url, options));
            }
            BackendCommand::StartAll { options, reply } => {
                let _ = reply.send(self.start_all(&options));
            }
            BackendCommand::StartOne {
                url,
                options,
                reply,
            } => {
                let video = self
                    .videos
                    .iter()
                    .find(|v| v.source_url == url)
                    .cloned()
                    .unwrap_or_else(|| VideoDescriptor::new(url.clone(), url.clone()));
                let _ = reply.send(self.start_job(video, &options));
            }
            BackendCommand::CancelOne { url, reply } => {
                let _ = reply.send(self.cancel_one(&url));
            }
            BackendCommand::CancelAll { reply } => {
                let _ = reply.send(self.cancel_all());
            }
            BackendCommand::Counters { reply } => {
                let _ = reply.send(self.counters());
            }
            BackendCommand::Job { url, reply } => {
                let _ = reply.send(self.views.get(&url).cloned());
            }
            BackendCommand::Jobs { reply } => {
                let mut jobs: Vec<JobView> = self.views.values().cloned().collect();
                jobs.sort_by_key(|job| job.started_at);
                let _ = reply.send(jobs);
            }
            BackendCommand::Clear { reply } => {
                self.clear();
                let _ = reply.send(());
            }
            BackendCommand::Shutdown { reply } => {
                // Handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    // ============================================================
    // Listing
    // ============================================================

    fn start_listing(
        &mut self,
        url: String,
        reply: oneshot::Sender<Result<Listing, LoaderError>>,
    ) {
        if self.listing_in_progress {
            warn!("Rejected listing of {}: another listing is running", url);
            let _ = reply.send(Err(LoaderError::ListingInProgress));
            return;
        }

        self.listing_in_progress = true;
        self.streamed_entries = 0;
        self.emit(BackendEvent::ListingStarted { url: url.clone() });

        let lister = self.lister.clone();
        let out = self.listing_tx.clone();
        tokio::spawn(async move {
            let (entry_tx, mut entry_rx) = mpsc::unbounded_channel();
            let forward = async {
                while let Some(video) = entry_rx.recv().await {
                    let _ = out.send(ListingMessage::Entry(video));
                }
            };
            let (result, ()) = tokio::join!(lister.list(&url, entry_tx), forward);
            let _ = out.send(ListingMessage::Done { url, result, reply });
        });
    }

    fn handle_listing(&mut self, message: ListingMessage) {
        match message {
            ListingMessage::Entry(video) => {
                self.streamed_entries += 1;
                self.emit(BackendEvent::VideoListed {
                    index: self.streamed_entries,
                    video,
                });
            }
            ListingMessage::Done { url, result, reply } => {
                self.listing_in_progress = false;
                match &result {
                    Ok(listing) => {
                        info!(
                            "Loaded {} videos from {} ({} skipped)",
                            listing.videos.len(),
                            url,
                            listing.skipped
                        );
                        self.videos = listing.videos.clone();
                        self.playlist_loaded = true;
                        self.selection.clear();
                        self.overrides.clear();
                        self.views.retain(|_, view| !view.state.is_terminal());
                        self.counters = AggregateCounters {
                            total: self.videos.len(),
                            ..AggregateCounters::default()
                        };
                        self.emit(BackendEvent::ListingFinished {
                            url,
                            count: listing.videos.len(),
                            skipped: listing.skipped,
                        });
                        self.emit_counters();
                    }
                    Err(e) => {
                        error!("Listing {} failed: {}", url, e);
                        self.emit(BackendEvent::ListingFailed {
                            url,
                            error: e.to_string(),
                        });
                    }
                }
                let _ = reply.send(result);
            }
        }
    }

    fn select_videos(&mut self, expr: &str) -> Result<Vec<VideoDescriptor>, LoaderError> {
        if !self.playlist_loaded {
            return Err(LoaderError::NoPlaylistLoaded);
        }
        let indices = parse_selection(expr, self.videos.len())?;
        let picked = indices.iter().map(|i| self.videos[i - 1].clone()).collect();
        debug!("Selected {} of {} videos", indices.len(), self.videos.len());
        self.selection = indices;
        Ok(picked)
    }

    fn set_override(&mut self, url: String, options: OptionsOverride) -> Result<(), LoaderError> {
        if !self.videos.iter().any(|v| v.source_url == url) {
            return Err(LoaderError::OperationFailed(format!(
                "{} is not in the loaded playlist",
                url
            )));
        }
        self.overrides.insert(url, options);
        Ok(())
    }

    // ============================================================
    // Downloads
    // ============================================================

    fn start_all(&mut self, options: &DownloadOptions) -> Result<usize, LoaderError> {
        if !self.playlist_loaded {
            return Err(LoaderError::NoPlaylistLoaded);
        }

        let targets: Vec<VideoDescriptor> = if self.selection.is_empty() {
            self.videos.clone()
        } else {
            self.selection
                .iter()
                .map(|i| self.videos[i - 1].clone())
                .collect()
        };

        let mut started = 0;
        for video in targets {
            if self.registry.contains(&video.source_url) {
                debug!("Skipping {}: already downloading", video.source_url);
                continue;
            }
            // Spawn failures are recorded per job and do not stop the batch
            if let Ok(true) = self.start_job(video, options) {
                started += 1;
            }
        }

        info!("Started {} downloads", started);
        Ok(started)
    }

    /// Start one download. `Ok(false)` means the URL is already in flight.
    fn start_job(
        &mut self,
        video: VideoDescriptor,
        global: &DownloadOptions,
    ) -> Result<bool, LoaderError> {
        let url = video.source_url.clone();
        if self.registry.contains(&url) {
            debug!("Ignoring start of {}: already downloading", url);
            return Ok(false);
        }

        if !self.videos.iter().any(|v| v.source_url == url) && !self.views.contains_key(&url) {
            self.counters.total += 1;
        }

        let options = DownloadOptions::resolve(global, self.overrides.get(&url));
        let mut view = JobView::new(video.clone(), options.clone());
        let cancel = CancellationToken::new();

        let spawned = self
            .tool
            .binary()
            .map_err(|e| LoaderError::DownloadError(e.to_string()))
            .and_then(|program| {
                DownloadJob::spawn(
                    &program,
                    video.clone(),
                    &options,
                    &self.settings.download_location,
                    self.settings.termination_grace(),
                    cancel.clone(),
                )
            });

        let job = match spawned {
            Ok(job) => job,
            Err(e) => {
                error!("Could not start download of {}: {}", url, e);
                let state = JobState::Failed(e.to_string());
                view.finish(state.clone());
                self.views.insert(url.clone(), view);
                self.counters.failed += 1;
                self.emit(BackendEvent::DownloadFinished {
                    url,
                    title: video.title,
                    state,
                });
                self.emit_counters();
                return Err(e);
            }
        };

        self.registry.insert(JobHandle::new(video.clone(), cancel));
        view.state = JobState::Running;
        self.views.insert(url.clone(), view);

        self.emit(BackendEvent::DownloadStarted {
            url,
            title: video.title,
            options,
        });
        self.emit_counters();

        tokio::spawn(job.run(self.job_tx.clone()));
        Ok(true)
    }

    fn cancel_one(&mut self, url: &str) -> bool {
        if !self.registry.cancel(url) {
            debug!("Cancel of {} ignored: not running or already cancelling", url);
            return false;
        }
        self.mark_cancelling(url);
        true
    }

    fn cancel_all(&mut self) -> usize {
        let urls = self.registry.cancel_all();
        for url in &urls {
            self.mark_cancelling(url);
        }
        if !urls.is_empty() {
            info!("Cancelling {} downloads", urls.len());
        }
        urls.len()
    }

    fn mark_cancelling(&mut self, url: &str) {
        if let Some(view) = self.views.get_mut(url) {
            view.state = JobState::Cancelling;
            view.status_text = "Cancelling".to_string();
        }
        self.emit(BackendEvent::DownloadCancelling {
            url: url.to_string(),
        });
    }

    fn clear(&mut self) {
        self.cancel_all();
        self.discarded.extend(self.registry.urls());
        self.videos.clear();
        self.playlist_loaded = false;
        self.selection.clear();
        self.overrides.clear();
        self.views.retain(|url, _| self.discarded.contains(url));
        self.counters = AggregateCounters::default();
        info!("Cleared playlist and counters");
        self.emit_counters();
    }

    // ============================================================
    // Job events
    // ============================================================

    fn handle_job_event(&mut self, event: JobEvent) {
        match event {
            JobEvent::Output { url, line, raw } => {
                let Some(view) = self.views.get_mut(&url) else {
                    return;
                };
                view.apply(&line);
                view.last_status_line = raw;
                let event = match line {
                    OutputLine::Progress(_) => BackendEvent::DownloadProgress {
                        url,
                        progress: view.progress,
                        speed: view.speed.clone(),
                        eta: view.eta.clone(),
                    },
                    _ => BackendEvent::DownloadStatus {
                        url,
                        text: view.status_text.clone(),
                    },
                };
                self.emit(event);
            }
            JobEvent::Finished {
                url,
                outcome,
                exit_code,
            } => self.finish_job(url, outcome, exit_code),
        }
    }

    fn finish_job(&mut self, url: String, outcome: JobOutcome, exit_code: Option<i32>) {
        if self.registry.remove(&url).is_none() {
            warn!("Finished event for unregistered job {}", url);
            return;
        }
        debug!("Job {} exited with {:?}", url, exit_code);

        let state = JobState::from(outcome);
        let title = match self.views.get_mut(&url) {
            Some(view) => {
                view.finish(state.clone());
                view.video.title.clone()
            }
            None => url.clone(),
        };

        if self.discarded.remove(&url) {
            self.views.remove(&url);
        } else {
            match &state {
                JobState::Succeeded => self.counters.completed += 1,
                JobState::Cancelled => self.counters.cancelled += 1,
                _ => self.counters.failed += 1,
            }
        }

        self.emit(BackendEvent::DownloadFinished { url, title, state });
        self.emit_counters();

        if self.registry.is_empty() {
            info!("All downloads finished");
            self.emit(BackendEvent::AllIdle);
        }
    }

    // ============================================================
    // Helpers
    // ============================================================

    fn counters(&self) -> AggregateCounters {
        AggregateCounters {
            active: self.registry.len(),
            ..self.counters
        }
    }

    fn emit_counters(&self) {
        self.emit(BackendEvent::CountersChanged(self.counters()));
    }

    fn emit(&self, event: BackendEvent) {
        if self.sender.send(event).is_err() {
            debug!("No event listener attached");
        }
    }
}
