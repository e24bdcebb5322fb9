//! playlist-loader - download videos from a playlist with yt-dlp
//!
//! Lists a playlist, lets the user pick entries, then runs one yt-dlp
//! process per video while rendering progress in the terminal.

use anyhow::{anyhow, Result};
use clap::Parser;
use playlist_loader::backend::{BackendEvent, BackendHandle};
use playlist_loader::downloader::{DownloadOptions, JobState, Quality};
use playlist_loader::extractor::{VideoDescriptor, YtDlpExtractor};
use playlist_loader::utils::format::{progress_bar, truncate};
use playlist_loader::utils::{format_duration, format_view_count, AppSettings};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "playlist-loader", version, about = "Download videos from a playlist with yt-dlp")]
struct Args {
    /// Playlist URL; prompted for when omitted
    url: Option<String>,

    /// Directory downloads are written to
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// best, 1080, 720, 480, or a raw yt-dlp format selector
    #[arg(short, long)]
    quality: Option<String>,

    /// Extract audio to mp3
    #[arg(long)]
    audio_only: bool,

    /// Path to the yt-dlp executable
    #[arg(long = "yt-dlp", value_name = "PATH")]
    ytdlp: Option<PathBuf>,

    /// Milliseconds a cancelled download gets to exit before it is killed
    #[arg(long, value_name = "MS")]
    grace_ms: Option<u64>,

    /// Write the effective settings to the settings file before starting
    #[arg(long)]
    save_settings: bool,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut settings = AppSettings::load();
    if let Some(dir) = args.output {
        settings.download_location = dir;
    }
    if let Some(quality) = args.quality.as_deref() {
        settings.quality = Quality::parse(quality);
    }
    if args.audio_only {
        settings.audio_only = true;
    }
    if let Some(path) = args.ytdlp {
        settings.ytdlp_path = Some(path);
    }
    if let Some(ms) = args.grace_ms {
        settings.termination_grace_ms = ms.max(1);
    }
    if args.save_settings {
        let path = AppSettings::default_path()
            .ok_or_else(|| anyhow!("No configuration directory on this system"))?;
        settings.save_to(&path)?;
        println!("Settings saved to {}", path.display());
    }

    // Check for yt-dlp
    let extractor = YtDlpExtractor::new(settings.ytdlp_path.clone());
    match extractor.version().await {
        Ok(version) => println!("yt-dlp found: {}", version),
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Please install yt-dlp:");
            eprintln!("  pip install yt-dlp");
            eprintln!("  or visit: https://github.com/yt-dlp/yt-dlp");
            return Err(anyhow!("yt-dlp is required"));
        }
    }

    let options = settings.default_options();
    println!("Downloads will be saved to: {}", settings.download_location.display());
    println!("Format: {}", options.describe());

    let (backend, mut events) = BackendHandle::spawn(settings, Arc::new(extractor));
    let mut prompt = Prompt::new();
    let mut pending_url = args.url;

    loop {
        let url = match pending_url.take() {
            Some(url) => url,
            None => {
                println!("\n{}", "=".repeat(60));
                match prompt.ask("Enter playlist URL (or 'exit' to quit): ").await? {
                    Some(line) => line,
                    None => break,
                }
            }
        };

        if is_exit(&url) {
            break;
        }
        if url.is_empty() {
            println!("Please enter a valid URL.");
            continue;
        }

        println!("Fetching playlist information...");
        let listed = tokio::select! {
            listed = backend.list_playlist(url.as_str()) => listed,
            _ = tokio::signal::ctrl_c() => break,
        };
        let listing = match listed {
            Ok(listing) => listing,
            Err(e) => {
                eprintln!("Could not list {}: {}", url, e);
                continue;
            }
        };

        if listing.skipped > 0 {
            println!("Skipped {} invalid entries", listing.skipped);
        }
        if listing.videos.is_empty() {
            println!("Could not find any videos at that URL. Please try again.");
            continue;
        }
        print_table(&listing.videos);

        let Some(selected) = choose(&backend, &mut prompt).await? else {
            if prompt.interrupted {
                break;
            }
            continue;
        };
        println!("Selected {} videos", selected.len());

        if let Err(e) = run_downloads(&backend, &mut events, options.clone()).await {
            eprintln!("Downloads stopped: {}", e);
        }
    }

    println!("Goodbye!");
    let _ = backend.shutdown().await;
    Ok(())
}

/// Line-oriented stdin
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
    /// Set when Ctrl-C ended a question
    interrupted: bool,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            interrupted: false,
        }
    }

    /// `None` on end of input or Ctrl-C.
    ///
    /// Once a Ctrl-C handler is installed the default SIGINT action is gone,
    /// so every prompt has to watch for it.
    async fn ask(&mut self, question: &str) -> Result<Option<String>> {
        print!("{}", question);
        std::io::stdout().flush()?;
        tokio::select! {
            line = self.lines.next_line() => Ok(line?.map(|line| line.trim().to_string())),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                println!();
                self.interrupted = true;
                Ok(None)
            }
        }
    }
}

fn is_exit(input: &str) -> bool {
    matches!(input.to_ascii_lowercase().as_str(), "exit" | "quit" | "q")
}

/// Ask for a selection until one parses. `None` returns to the URL prompt.
async fn choose(
    backend: &BackendHandle,
    prompt: &mut Prompt,
) -> Result<Option<Vec<VideoDescriptor>>> {
    println!("\nSelection options:");
    println!("  all              download every video");
    println!("  1, 3, 5          individual videos");
    println!("  1-5, 10-15       ranges");
    println!("  1, 3-5, 8        combined");
    println!("  back             return to the URL prompt");

    loop {
        let Some(expr) = prompt.ask("\nYour selection: ").await? else {
            return Ok(None);
        };
        if expr.eq_ignore_ascii_case("back") || is_exit(&expr) {
            return Ok(None);
        }

        match backend.select_videos(expr).await {
            Ok(selected) => return Ok(Some(selected)),
            Err(e) if e.is_reprompt() => println!("{}. Please try again.", e),
            Err(e) => {
                eprintln!("{}", e);
                return Ok(None);
            }
        }
    }
}

fn print_table(videos: &[VideoDescriptor]) {
    let rule = "-".repeat(96);
    println!("\n{}", "=".repeat(96));
    println!("VIDEOS FOUND IN PLAYLIST");
    println!("{}", "=".repeat(96));
    println!(
        "{:<5} {:<50} {:<10} {:<18} {:<8}",
        "No.", "Title", "Duration", "Uploader", "Views"
    );
    println!("{}", rule);
    for (i, video) in videos.iter().enumerate() {
        println!(
            "{:<5} {:<50} {:<10} {:<18} {:<8}",
            i + 1,
            truncate(&video.title, 50),
            format_duration(video.duration),
            truncate(&video.uploader, 18),
            format_view_count(video.view_count),
        );
    }
    println!("{}", rule);
    println!("Total videos: {}", videos.len());
}

/// Start the current selection and render events until every job is done
async fn run_downloads(
    backend: &BackendHandle,
    events: &mut mpsc::UnboundedReceiver<BackendEvent>,
    options: DownloadOptions,
) -> Result<()> {
    // Listing events are not rendered here
    while events.try_recv().is_ok() {}

    let started_at = Instant::now();
    let started = backend.start_all(options).await?;
    if started > 0 {
        println!("\nStarting {} downloads (Ctrl-C cancels all)\n", started);
        render_until_idle(backend, events).await?;
    } else {
        // Spawn failures are reported through events
        while let Ok(event) = events.try_recv() {
            render(&event, &mut HashMap::new());
        }
    }

    let counters = backend.counters().await?;
    println!("\n{}", "=".repeat(60));
    println!("Download summary");
    for view in backend.jobs().await? {
        if view.state.is_terminal() {
            println!("  {:<10} {}", view.state.label(), truncate(&view.video.title, 60));
        }
    }
    println!("  Succeeded: {}", counters.completed);
    println!("  Failed:    {}", counters.failed);
    println!("  Cancelled: {}", counters.cancelled);
    println!(
        "  Elapsed:   {}",
        format_duration(Some(started_at.elapsed().as_secs()))
    );
    Ok(())
}

async fn render_until_idle(
    backend: &BackendHandle,
    events: &mut mpsc::UnboundedReceiver<BackendEvent>,
) -> Result<()> {
    let mut titles: HashMap<String, (String, u32)> = HashMap::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BackendEvent::AllIdle) | None => return Ok(()),
                Some(event) => render(&event, &mut titles),
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                let cancelled = backend.cancel_all().await?;
                println!("\nCancelling {} downloads...", cancelled);
            }
        }
    }
}

/// Print one event. `titles` maps URL to title and the last printed 10% step.
fn render(event: &BackendEvent, titles: &mut HashMap<String, (String, u32)>) {
    match event {
        BackendEvent::DownloadStarted {
            url,
            title,
            options,
        } => {
            println!("> Starting: {} [{}]", title, options.describe());
            titles.insert(url.clone(), (title.clone(), 0));
        }
        BackendEvent::DownloadProgress {
            url,
            progress,
            speed,
            eta,
        } => {
            let Some((title, shown)) = titles.get_mut(url) else {
                return;
            };
            let step = (progress * 10.0).floor() as u32;
            if step <= *shown {
                return;
            }
            *shown = step;
            println!(
                "  {} {} {} ETA {}",
                progress_bar(*progress, 20),
                truncate(title, 40),
                speed.as_deref().unwrap_or("-"),
                eta.as_deref().unwrap_or("-"),
            );
        }
        BackendEvent::DownloadStatus { url, text } if text.starts_with("Processing") => {
            if let Some((title, _)) = titles.get(url) {
                println!("  {}: {}", truncate(title, 40), text);
            }
        }
        BackendEvent::DownloadCancelling { url } => {
            let title = titles.get(url).map(|(t, _)| t.as_str()).unwrap_or(url);
            println!("  Cancelling: {}", title);
        }
        BackendEvent::DownloadFinished { title, state, .. } => match state {
            JobState::Succeeded => println!("+ Completed: {}", title),
            JobState::Cancelled => println!("- Cancelled: {}", title),
            JobState::Failed(reason) => println!("x Failed: {}: {}", title, reason),
            _ => {}
        },
        _ => {}
    }
}
