use super::actor::BackendActor;
use super::messages::{AggregateCounters, BackendCommand, BackendEvent};
use crate::downloader::{DownloadOptions, JobView, OptionsOverride};
use crate::extractor::{Listing, PlaylistLister, VideoDescriptor};
use crate::utils::config::AppSettings;
use crate::utils::error::LoaderError;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const COMMAND_BUFFER: usize = 64;

/// Cloneable front door to a running [`BackendActor`]
#[derive(Debug, Clone)]
pub struct BackendHandle {
    sender: mpsc::Sender<BackendCommand>,
}

impl BackendHandle {
    /// Start the actor on the current runtime. Events are delivered on the
    /// returned receiver; dropping it only discards them.
    pub fn spawn(
        settings: AppSettings,
        lister: Arc<dyn PlaylistLister>,
    ) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor = BackendActor::new(settings, lister, cmd_rx, event_tx);
        tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, event_rx)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BackendCommand,
    ) -> Result<T, LoaderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(build(reply_tx))
            .await
            .map_err(|_| backend_gone())?;
        reply_rx.await.map_err(|_| backend_gone())
    }

    /// Enumerate a playlist; entries are also streamed as `VideoListed` events
    pub async fn list_playlist(&self, url: impl Into<String>) -> Result<Listing, LoaderError> {
        let url = url.into();
        self.request(|reply| BackendCommand::ListPlaylist { url, reply })
            .await?
    }

    pub async fn select_videos(
        &self,
        expr: impl Into<String>,
    ) -> Result<Vec<VideoDescriptor>, LoaderError> {
        let expr = expr.into();
        self.request(|reply| BackendCommand::SelectVideos { expr, reply })
            .await?
    }

    pub async fn set_override(
        &self,
        url: impl Into<String>,
        options: OptionsOverride,
    ) -> Result<(), LoaderError> {
        let url = url.into();
        self.request(|reply| BackendCommand::SetOverride { url, options, reply })
            .await?
    }

    /// Start the selection (everything when nothing is selected). Returns how many started.
    pub async fn start_all(&self, options: DownloadOptions) -> Result<usize, LoaderError> {
        self.request(|reply| BackendCommand::StartAll { options, reply })
            .await?
    }

    /// Returns `Ok(false)` when the URL is already downloading
    pub async fn start_one(
        &self,
        url: impl Into<String>,
        options: DownloadOptions,
    ) -> Result<bool, LoaderError> {
        let url = url.into();
        self.request(|reply| BackendCommand::StartOne { url, options, reply })
            .await?
    }

    /// Returns whether a cancel request was newly issued
    pub async fn cancel_one(&self, url: impl Into<String>) -> Result<bool, LoaderError> {
        let url = url.into();
        self.request(|reply| BackendCommand::CancelOne { url, reply })
            .await
    }

    pub async fn cancel_all(&self) -> Result<usize, LoaderError> {
        self.request(|reply| BackendCommand::CancelAll { reply }).await
    }

    pub async fn counters(&self) -> Result<AggregateCounters, LoaderError> {
        self.request(|reply| BackendCommand::Counters { reply }).await
    }

    pub async fn job(&self, url: impl Into<String>) -> Result<Option<JobView>, LoaderError> {
        let url = url.into();
        self.request(|reply| BackendCommand::Job { url, reply }).await
    }

    /// Every job seen since the last listing, oldest first
    pub async fn jobs(&self) -> Result<Vec<JobView>, LoaderError> {
        self.request(|reply| BackendCommand::Jobs { reply }).await
    }

    pub async fn clear(&self) -> Result<(), LoaderError> {
        self.request(|reply| BackendCommand::Clear { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), LoaderError> {
        self.request(|reply| BackendCommand::Shutdown { reply }).await
    }
}

fn backend_gone() -> LoaderError {
    LoaderError::OperationFailed("backend is not running".to_string())
}
