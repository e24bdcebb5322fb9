//! One yt-dlp process per video
//!
//! A [`DownloadJob`] owns its child process and output pipes. It never
//! touches shared state: everything it learns is sent to the orchestrator
//! as [`JobEvent`]s, in the order the lines were produced.

use crate::downloader::options::{download_args, DownloadOptions};
use crate::downloader::progress::{JobOutcome, OutputLine, OutputTracker};
use crate::extractor::VideoDescriptor;
use crate::utils::error::LoaderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long to keep reading output after the process has exited. Helpers
/// spawned by yt-dlp (ffmpeg) can hold the pipes open past its exit.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Cancelling,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed(_) | JobState::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Cancelling => "Cancelling",
            JobState::Succeeded => "Succeeded",
            JobState::Failed(_) => "Failed",
            JobState::Cancelled => "Cancelled",
        }
    }
}

impl From<JobOutcome> for JobState {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Failed(reason) => JobState::Failed(reason),
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// Observable snapshot of one job, kept by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub video: VideoDescriptor,
    pub options: DownloadOptions,
    pub state: JobState,
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub status_text: String,
    /// Raw text of the last surfaced output line
    pub last_status_line: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobView {
    pub fn new(video: VideoDescriptor, options: DownloadOptions) -> Self {
        Self {
            video,
            options,
            state: JobState::Pending,
            progress: 0.0,
            speed: None,
            eta: None,
            status_text: String::new(),
            last_status_line: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Fold one parsed output line into the view
    pub fn apply(&mut self, line: &OutputLine) {
        match line {
            OutputLine::Progress(update) => {
                if update.fraction > self.progress {
                    self.progress = update.fraction;
                }
                self.speed = update.speed.clone();
                self.eta = update.eta.clone();
                self.status_text = format!("Downloading {:.1}%", self.progress * 100.0);
            }
            OutputLine::Processing(text) => {
                self.status_text = format!("Processing: {}", text);
            }
            OutputLine::Warning(text) | OutputLine::Info(text) => {
                self.status_text = text.clone();
            }
            OutputLine::Blank => {}
        }
    }

    pub fn finish(&mut self, state: JobState) {
        match &state {
            JobState::Succeeded => {
                self.progress = 1.0;
                self.status_text = "Completed".to_string();
            }
            JobState::Failed(reason) => self.status_text = reason.clone(),
            JobState::Cancelled => self.status_text = "Cancelled".to_string(),
            _ => {}
        }
        self.speed = None;
        self.eta = None;
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}

/// Messages from a job task to the orchestrator
#[derive(Debug, Clone)]
pub enum JobEvent {
    Output {
        url: String,
        line: OutputLine,
        raw: String,
    },
    Finished {
        url: String,
        outcome: JobOutcome,
        exit_code: Option<i32>,
    },
}

/// A spawned yt-dlp download
pub struct DownloadJob {
    video: VideoDescriptor,
    child: Child,
    cancel: CancellationToken,
    grace: Duration,
}

impl DownloadJob {
    /// Start the process. Nothing is read until [`DownloadJob::run`].
    pub fn spawn(
        program: &Path,
        video: VideoDescriptor,
        options: &DownloadOptions,
        directory: &Path,
        grace: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, LoaderError> {
        std::fs::create_dir_all(directory)?;

        let args = download_args(&video, options, directory);
        debug!("Spawning {} {:?}", program.display(), args);

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!("Failed to start {} for {}: {}", program.display(), video.source_url, e);
                LoaderError::DownloadError(format!(
                    "could not start {}: {}",
                    program.display(),
                    e
                ))
            })?;

        info!(
            "Started download of '{}' ({}) as pid {:?}",
            video.title,
            options.describe(),
            child.id()
        );

        Ok(Self {
            video,
            child,
            cancel,
            grace,
        })
    }

    /// Drive the process to completion, reporting to `events`.
    ///
    /// Always ends with exactly one [`JobEvent::Finished`].
    pub async fn run(self, events: mpsc::UnboundedSender<JobEvent>) {
        let DownloadJob {
            video,
            mut child,
            cancel,
            grace,
        } = self;
        let url = video.source_url;

        let (line_tx, mut lines) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let mut tracker = OutputTracker::new();
        let mut output_open = true;
        let mut exit: Option<std::io::Result<ExitStatus>> = None;
        let mut cancel_requested = false;
        let mut kill_at: Option<Instant> = None;
        let mut drain_until: Option<Instant> = None;

        loop {
            if exit.is_some() && !output_open {
                break;
            }

            tokio::select! {
                line = lines.recv(), if output_open => match line {
                    Some(line) => {
                        debug!("yt-dlp [{}]: {}", url, line);
                        if let Some(parsed) = tracker.observe(&line) {
                            let _ = events.send(JobEvent::Output {
                                url: url.clone(),
                                line: parsed,
                                raw: tracker.last_status().to_string(),
                            });
                        }
                    }
                    None => output_open = false,
                },
                status = child.wait(), if exit.is_none() => {
                    exit = Some(status);
                    kill_at = None;
                    drain_until = Some(Instant::now() + OUTPUT_DRAIN_TIMEOUT);
                }
                _ = cancel.cancelled(), if !cancel_requested && exit.is_none() => {
                    cancel_requested = true;
                    info!("Cancelling download of {}", url);
                    if request_termination(&child) {
                        kill_at = Some(Instant::now() + grace);
                    } else {
                        force_kill(&mut child, &url);
                    }
                }
                _ = sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                    warn!("{} ignored termination for {:?}, killing", url, grace);
                    kill_at = None;
                    force_kill(&mut child, &url);
                }
                _ = sleep_until(drain_until.unwrap_or_else(Instant::now)), if drain_until.is_some() && output_open => {
                    warn!("Output of {} still open after exit, abandoning it", url);
                    output_open = false;
                }
            }
        }

        let (outcome, exit_code) = match exit {
            Some(Ok(status)) => {
                let code = status.code();
                (tracker.verdict(code, cancel_requested), code)
            }
            Some(Err(e)) => {
                error!("Failed to wait for {}: {}", url, e);
                (JobOutcome::Failed(format!("failed to wait for process: {}", e)), None)
            }
            None => (JobOutcome::Failed("process state unknown".to_string()), None),
        };

        match &outcome {
            JobOutcome::Succeeded => info!("Download finished: {}", url),
            JobOutcome::Cancelled => info!("Download cancelled: {}", url),
            JobOutcome::Failed(reason) => warn!("Download failed: {}: {}", url, reason),
        }

        let _ = events.send(JobEvent::Finished {
            url,
            outcome,
            exit_code,
        });
    }
}

/// Forward each line of `reader` until end of stream
async fn forward_lines<R>(reader: R, sink: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(raw)) => {
                let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                if sink.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }
}

/// Ask the process to stop. Returns false when no polite signal could be sent.
#[cfg(unix)]
fn request_termination(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; pid is our own unreaped child.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!("SIGTERM to pid {} failed: {}", pid, std::io::Error::last_os_error());
    }
    rc == 0
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) -> bool {
    false
}

fn force_kill(child: &mut Child, url: &str) {
    if let Err(e) = child.start_kill() {
        debug!("Kill of {} failed (already exited?): {}", url, e);
    }
}
