use crate::extractor::models::{Listing, VideoDescriptor};
use crate::utils::error::LoaderError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Source of playlist entries
///
/// Isolates the orchestrator from how a playlist is enumerated. The
/// production implementation shells out to yt-dlp; tests substitute
/// canned listings.
#[async_trait]
pub trait PlaylistLister: Send + Sync {
    /// Returns a unique identifier for this lister (e.g., "ytdlp-flat")
    fn id(&self) -> &'static str;

    /// Enumerate `url`, pushing each valid entry into `entries` as soon as it
    /// is parsed. The returned listing holds the same entries in order.
    async fn list(
        &self,
        url: &str,
        entries: mpsc::UnboundedSender<VideoDescriptor>,
    ) -> Result<Listing, LoaderError>;
}
