//! Application configuration

use crate::downloader::{DownloadOptions, Quality};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const SETTINGS_FILE: &str = "settings.json";
const APP_DIR: &str = "playlist-loader";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Download location
    pub download_location: PathBuf,

    /// Explicit yt-dlp binary; discovered on PATH when unset
    pub ytdlp_path: Option<PathBuf>,

    /// Preferred video quality
    pub quality: Quality,

    /// Extract audio for every download
    pub audio_only: bool,

    /// Time a job gets to exit after SIGTERM before it is killed
    pub termination_grace_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            download_location: dirs::download_dir()
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from(".")),
            ytdlp_path: None,
            quality: Quality::Best,
            audio_only: false,
            termination_grace_ms: 5_000,
        }
    }
}

impl AppSettings {
    /// Location of the settings file, `<config_dir>/playlist-loader/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Load settings from `path`, falling back to defaults when the file is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Malformed settings file {}", path.display()))?;

        Ok(settings.sanitized())
    }

    /// Load settings from the default location
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{:#}; falling back to defaults", e);
                Self::default()
            }
        }
    }

    /// Persist settings as pretty JSON
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Global download options every job starts from
    pub fn default_options(&self) -> DownloadOptions {
        DownloadOptions {
            audio_only: self.audio_only,
            quality: self.quality.clone(),
        }
    }

    fn sanitized(mut self) -> Self {
        // A zero grace would skip SIGTERM entirely
        if self.termination_grace_ms == 0 {
            self.termination_grace_ms = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppSettings::default();
        assert!(config.termination_grace_ms > 0);
        assert!(config.ytdlp_path.is_none());
        assert_eq!(config.quality, Quality::Best);
        assert!(!config.audio_only);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = AppSettings::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.termination_grace_ms, 5_000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let settings = AppSettings {
            download_location: dir.path().to_path_buf(),
            ytdlp_path: Some(PathBuf::from("/opt/bin/yt-dlp")),
            quality: Quality::Custom("bv*+ba".to_string()),
            audio_only: true,
            termination_grace_ms: 250,
        };
        settings.save_to(&path).unwrap();

        let loaded = AppSettings::load_from(&path).unwrap();
        assert_eq!(loaded.download_location, dir.path());
        assert_eq!(loaded.quality, Quality::Custom("bv*+ba".to_string()));
        assert!(loaded.audio_only);
        assert_eq!(loaded.termination_grace(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{ "audio_only": true, "termination_grace_ms": 0 }"#).unwrap();

        let loaded = AppSettings::load_from(&path).unwrap();
        assert!(loaded.audio_only);
        assert_eq!(loaded.quality, Quality::Best);
        assert_eq!(loaded.termination_grace_ms, 1);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        assert!(AppSettings::load_from(&path).is_err());
    }
}
