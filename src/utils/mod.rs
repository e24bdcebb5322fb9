//! Utility modules for error handling, configuration and display formatting

pub mod config;
pub mod error;
pub mod format;

// Re-export for convenience
pub use config::AppSettings;
pub use error::LoaderError;
pub use format::{format_duration, format_view_count};
