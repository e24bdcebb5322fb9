//! Error handling for playlist-loader

use thiserror::Error;

/// Main error type for playlist-loader
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("yt-dlp is unavailable: {0}")]
    ListingUnavailable(String),

    #[error("Playlist listing returned nothing usable: {0}")]
    ListingError(String),

    #[error("A playlist is already being listed")]
    ListingInProgress,

    #[error("Invalid selection '{token}': {reason}")]
    InvalidSelection { token: String, reason: String },

    #[error("Selection is empty")]
    EmptySelection,

    #[error("No playlist has been loaded")]
    NoPlaylistLoaded,

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl LoaderError {
    /// Errors the user can recover from by re-entering input
    pub fn is_reprompt(&self) -> bool {
        matches!(self, Self::InvalidSelection { .. } | Self::EmptySelection)
    }
}
