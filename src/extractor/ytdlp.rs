//! yt-dlp wrapper for playlist listing
//!
//! This module enumerates playlists with `yt-dlp --flat-playlist -j` and
//! locates the yt-dlp binary. It supports an explicitly configured binary,
//! one found on PATH, and the usual package-manager install locations.

use crate::extractor::models::{FlatEntry, Listing, VideoDescriptor};
use crate::extractor::traits::PlaylistLister;
use crate::utils::error::LoaderError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Playlist lister backed by yt-dlp
#[derive(Debug, Clone, Default)]
pub struct YtDlpExtractor {
    configured: Option<PathBuf>,
}

impl YtDlpExtractor {
    /// `configured` overrides discovery when set
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self { configured }
    }

    /// Resolve the binary to run. Looked up on every call so that installing
    /// yt-dlp while the app is running makes the next attempt succeed.
    pub fn binary(&self) -> Result<PathBuf, LoaderError> {
        match &self.configured {
            Some(path) => Ok(path.clone()),
            None => find_ytdlp().ok_or_else(|| {
                LoaderError::ListingUnavailable(
                    "yt-dlp not found. Install it with `pip install yt-dlp`".to_string(),
                )
            }),
        }
    }

    /// `yt-dlp --version`, used for the startup dependency check
    pub async fn version(&self) -> Result<String, LoaderError> {
        let binary = self.binary()?;
        let output = Command::new(&binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| unavailable(&binary, e))?;

        if !output.status.success() {
            return Err(LoaderError::ListingUnavailable(format!(
                "{} --version exited with {}",
                binary.display(),
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl PlaylistLister for YtDlpExtractor {
    fn id(&self) -> &'static str {
        "ytdlp-flat"
    }

    async fn list(
        &self,
        url: &str,
        entries: mpsc::UnboundedSender<VideoDescriptor>,
    ) -> Result<Listing, LoaderError> {
        let binary = self.binary()?;
        debug!("Listing playlist {} with {}", url, binary.display());

        let mut child = Command::new(&binary)
            .arg("--flat-playlist")
            .arg("-j")
            .arg("--no-warnings")
            .arg("--ignore-errors")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(&binary, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LoaderError::OperationFailed("yt-dlp stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).split(b'\n');
                while let Ok(Some(line)) = lines.next_segment().await {
                    debug!("yt-dlp (listing): {}", String::from_utf8_lossy(&line).trim_end());
                }
            });
        }

        let listing = read_listing(stdout, &entries).await?;
        let status = child.wait().await?;

        if listing.videos.is_empty() && listing.skipped == 0 {
            error!("Listing {} produced no entries (exit status {})", url, status);
            return Err(LoaderError::ListingError(format!(
                "no entries returned for {} (yt-dlp exited with {})",
                url, status
            )));
        }

        if listing.skipped > 0 {
            warn!("Skipped {} invalid entries while listing {}", listing.skipped, url);
        }
        info!(
            "Listed {} videos from {} (exit status {})",
            listing.videos.len(),
            url,
            status
        );

        Ok(listing)
    }
}

/// Consume a line-delimited JSON stream, one entry per line
///
/// Blank lines are ignored. Lines that are not JSON objects, or lack
/// `title`/`url`, count as skipped. Valid entries are pushed into `entries`
/// as they are read; a closed receiver does not stop the read.
pub async fn read_listing<R>(
    reader: R,
    entries: &mpsc::UnboundedSender<VideoDescriptor>,
) -> Result<Listing, LoaderError>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).split(b'\n');
    let mut listing = Listing::default();

    while let Some(raw) = lines.next_segment().await? {
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_listing_line(line) {
            Some(video) => {
                let _ = entries.send(video.clone());
                listing.videos.push(video);
            }
            None => listing.skipped += 1,
        }
    }

    Ok(listing)
}

/// Parse one `-j` line into a descriptor
pub fn parse_listing_line(line: &str) -> Option<VideoDescriptor> {
    match serde_json::from_str::<FlatEntry>(line) {
        Ok(entry) => {
            let video = entry.into_descriptor();
            if video.is_none() {
                debug!("Skipping entry without title/url: {}", line);
            }
            video
        }
        Err(e) => {
            debug!("Failed to parse listing line: {}", e);
            None
        }
    }
}

fn unavailable(binary: &Path, e: std::io::Error) -> LoaderError {
    error!("Could not start {}: {}", binary.display(), e);
    LoaderError::ListingUnavailable(format!("could not start {}: {}", binary.display(), e))
}

// ============================================================
// yt-dlp Detection Functions
// ============================================================

/// Find yt-dlp binary with priority:
/// 1. Next to the running executable
/// 2. System PATH
/// 3. Common installation paths
pub fn find_ytdlp() -> Option<PathBuf> {
    if let Some(bundled) = find_bundled_ytdlp() {
        info!("Using bundled yt-dlp: {:?}", bundled);
        return Some(bundled);
    }

    if let Ok(system) = which::which("yt-dlp") {
        info!("Using system yt-dlp: {:?}", system);
        return Some(system);
    }

    if let Some(common) = find_in_common_paths() {
        info!("Using yt-dlp from common path: {:?}", common);
        return Some(common);
    }

    warn!("yt-dlp not found anywhere!");
    None
}

fn find_bundled_ytdlp() -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_dir = exe_path.parent()?;

    let candidate = exe_dir.join(if cfg!(windows) { "yt-dlp.exe" } else { "yt-dlp" });
    (candidate.is_file() && is_executable(&candidate)).then_some(candidate)
}

fn find_in_common_paths() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = [
        // macOS Homebrew (Apple Silicon)
        "/opt/homebrew/bin/yt-dlp",
        // macOS Homebrew (Intel)
        "/usr/local/bin/yt-dlp",
        // System
        "/usr/bin/yt-dlp",
    ]
    .iter()
    .map(PathBuf::from)
    .collect();

    // pip --user installs
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local").join("bin").join("yt-dlp"));
    }

    candidates
        .into_iter()
        .find(|path| path.is_file() && is_executable(path))
}

/// Check if a file is executable
fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::metadata(path)
            .map(|metadata| metadata.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.exists()
    }
}

// ============================================================
// Tests
// ============================================================
