//! End-to-end orchestration against a scripted stand-in for yt-dlp
#![cfg(unix)]

use playlist_loader::backend::{BackendEvent, BackendHandle};
use playlist_loader::downloader::{DownloadOptions, JobState};
use playlist_loader::extractor::YtDlpExtractor;
use playlist_loader::utils::{AppSettings, LoaderError};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const LISTING: &str = r#"
echo '{"title":"Ok","url":"https://v/ok","duration":61,"uploader":"Chan"}'
echo '{"title":"Marker","url":"https://v/marker"}'
echo '{"title":"Broken","url":"https://v/fail"}'
echo '{"title":"Slow A","url":"https://v/slow-a"}'
echo '{"title":"Slow B","url":"https://v/slow-b"}'
echo '{"title":"Stubborn","url":"https://v/stubborn"}'
"#;

const DOWNLOADS: &str = r#"
for url; do :; done
case "$url" in
  */ok)
    echo "[youtube] ok: Downloading webpage"
    echo "[download]  50.0% of 1.00MiB at 1.00MiB/s ETA 00:01"
    echo "[download] 100% of 1.00MiB in 00:00:01"
    exit 0 ;;
  */marker)
    echo "[download]  10.0% of 1.00MiB"
    echo "[download]  55.5% of 1.00MiB"
    echo "[download] 100% of 1.00MiB"
    echo "ERROR: Postprocessing: ffprobe not found" >&2
    exit 1 ;;
  */fail)
    echo "[youtube] fail: Downloading webpage"
    echo "ERROR: [youtube] fail: Video unavailable" >&2
    exit 1 ;;
  */slow-*)
    echo "[download]   1.0% of 9.00MiB"
    exec sleep 30 ;;
  */stubborn)
    trap '' TERM
    echo "[youtube] stubborn: waiting"
    exec sleep 30 ;;
esac
exit 3
"#;

fn fake_ytdlp(dir: &Path, listing: &str) -> PathBuf {
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 2024.01.01; exit 0; fi\nif [ \"$1\" = \"--flat-playlist\" ]; then\n{}\nexit 0\nfi\n{}",
        listing, DOWNLOADS
    );
    let path = dir.join("yt-dlp");
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

struct Harness {
    backend: BackendHandle,
    events: UnboundedReceiver<BackendEvent>,
    _dir: TempDir,
}

fn harness_with(listing: &str, grace_ms: u64) -> Harness {
    let dir = tempdir().expect("Failed to create temp dir");
    let tool = fake_ytdlp(dir.path(), listing);
    let settings = AppSettings {
        download_location: dir.path().join("out"),
        ytdlp_path: Some(tool.clone()),
        termination_grace_ms: grace_ms,
        ..AppSettings::default()
    };
    let lister = Arc::new(YtDlpExtractor::new(Some(tool)));
    let (backend, events) = BackendHandle::spawn(settings, lister);
    Harness {
        backend,
        events,
        _dir: dir,
    }
}

async fn loaded(grace_ms: u64) -> Harness {
    let harness = harness_with(LISTING, grace_ms);
    let listing = harness.backend.list_playlist("https://list").await.unwrap();
    assert_eq!(listing.videos.len(), 6);
    harness
}

async fn next_matching<F>(events: &mut UnboundedReceiver<BackendEvent>, mut pred: F) -> BackendEvent
where
    F: FnMut(&BackendEvent) -> bool,
{
    timeout(Duration::from_secs(15), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn finished_for<'a>(url: &'a str) -> impl FnMut(&BackendEvent) -> bool + 'a {
    move |event| matches!(event, BackendEvent::DownloadFinished { url: u, .. } if u == url)
}

#[tokio::test]
async fn test_listing_counts_skipped_lines() {
    let listing = r#"
echo '{"title":"One","url":"https://v/1"}'
echo 'not json'
echo '{"title":"Two","url":"https://v/2","view_count":1200}'
echo '{"url":"https://v/no-title"}'
echo '{"title":"Three","url":"https://v/3"}'
"#;
    let mut harness = harness_with(listing, 5000);

    let result = harness.backend.list_playlist("https://list").await.unwrap();
    let titles: Vec<_> = result.videos.iter().map(|v| v.title.as_str()).collect();
    assert_eq!(titles, ["One", "Two", "Three"]);
    assert_eq!(result.skipped, 2);

    let finished = next_matching(&mut harness.events, |e| {
        matches!(e, BackendEvent::ListingFinished { .. })
    })
    .await;
    assert!(matches!(
        finished,
        BackendEvent::ListingFinished { count: 3, skipped: 2, .. }
    ));
    assert_eq!(harness.backend.counters().await.unwrap().total, 3);
}

async fn assert_listing_error(listing: &str) {
    let mut harness = harness_with(listing, 5000);

    let result = harness.backend.list_playlist("https://list").await;
    assert!(
        matches!(result, Err(LoaderError::ListingError(_))),
        "expected ListingError, got {:?}",
        result
    );

    let failed = next_matching(&mut harness.events, |e| {
        matches!(e, BackendEvent::ListingFailed { .. })
    })
    .await;
    assert!(matches!(failed, BackendEvent::ListingFailed { url, .. } if url == "https://list"));

    // A failed listing does not count as a loaded playlist
    assert!(matches!(
        harness.backend.select_videos("all").await,
        Err(LoaderError::NoPlaylistLoaded)
    ));
}

#[tokio::test]
async fn test_silent_listing_is_an_error() {
    assert_listing_error(":").await;
}

#[tokio::test]
async fn test_blank_only_listing_is_an_error() {
    assert_listing_error("echo ''\necho '   '\necho ''").await;
}

#[tokio::test]
async fn test_listing_of_only_malformed_lines_loads_an_empty_playlist() {
    let listing = r#"
echo 'not json'
echo '{"title":"No url"}'
"#;
    let mut harness = harness_with(listing, 5000);

    let result = harness.backend.list_playlist("https://list").await.unwrap();
    assert!(result.videos.is_empty());
    assert_eq!(result.skipped, 2);
    next_matching(&mut harness.events, |e| {
        matches!(e, BackendEvent::ListingFinished { count: 0, skipped: 2, .. })
    })
    .await;

    // Loaded but empty: the selection is re-prompted, not refused
    let err = harness.backend.select_videos("all").await.unwrap_err();
    assert!(matches!(err, LoaderError::EmptySelection));
    assert!(err.is_reprompt());
    assert_eq!(
        harness
            .backend
            .start_all(DownloadOptions::default())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_mixed_outcomes_and_single_all_idle() {
    let mut harness = loaded(5000).await;

    let selected = harness.backend.select_videos("3, 1-2").await.unwrap();
    assert_eq!(selected.len(), 3);
    let started = harness
        .backend
        .start_all(DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(started, 3);

    next_matching(&mut harness.events, |e| matches!(e, BackendEvent::AllIdle)).await;

    let counters = harness.backend.counters().await.unwrap();
    assert_eq!(counters.total, 6);
    assert_eq!(counters.completed, 2);
    assert_eq!(counters.failed, 1);
    assert_eq!(counters.active, 0);

    // Non-zero exit but the 100% marker was seen
    let marker = harness.backend.job("https://v/marker").await.unwrap().unwrap();
    assert_eq!(marker.state, JobState::Succeeded);
    assert_eq!(marker.progress, 1.0);

    let ok = harness.backend.job("https://v/ok").await.unwrap().unwrap();
    assert_eq!(ok.last_status_line, "[download] 100% of 1.00MiB in 00:00:01");

    let broken = harness.backend.job("https://v/fail").await.unwrap().unwrap();
    assert_eq!(
        broken.state,
        JobState::Failed("ERROR: [youtube] fail: Video unavailable".to_string())
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut extra_idle = 0;
    while let Ok(event) = harness.events.try_recv() {
        if matches!(event, BackendEvent::AllIdle) {
            extra_idle += 1;
        }
    }
    assert_eq!(extra_idle, 0);
}

#[tokio::test]
async fn test_starting_registered_url_is_noop() {
    let mut harness = loaded(5000).await;
    let backend = &harness.backend;

    assert!(backend
        .start_one("https://v/slow-a", DownloadOptions::default())
        .await
        .unwrap());
    assert!(!backend
        .start_one("https://v/slow-a", DownloadOptions::default())
        .await
        .unwrap());
    assert_eq!(backend.select_videos("4").await.unwrap().len(), 1);
    assert_eq!(
        backend.start_all(DownloadOptions::default()).await.unwrap(),
        0
    );
    assert_eq!(backend.counters().await.unwrap().active, 1);

    assert!(backend.cancel_one("https://v/slow-a").await.unwrap());
    next_matching(&mut harness.events, |e| matches!(e, BackendEvent::AllIdle)).await;
}

#[tokio::test]
async fn test_cancel_one_leaves_others_running() {
    let mut harness = loaded(5000).await;
    let backend = harness.backend.clone();

    backend.select_videos("4-5").await.unwrap();
    assert_eq!(
        backend.start_all(DownloadOptions::default()).await.unwrap(),
        2
    );
    assert_eq!(backend.counters().await.unwrap().active, 2);

    assert!(backend.cancel_one("https://v/slow-a").await.unwrap());
    assert!(!backend.cancel_one("https://v/slow-a").await.unwrap());
    assert!(!backend.cancel_one("https://v/not-running").await.unwrap());

    let finished = next_matching(&mut harness.events, finished_for("https://v/slow-a")).await;
    assert!(matches!(
        finished,
        BackendEvent::DownloadFinished { state: JobState::Cancelled, .. }
    ));

    let counters = backend.counters().await.unwrap();
    assert_eq!(counters.active, 1);
    assert_eq!(counters.cancelled, 1);
    assert_eq!(counters.failed, 0);
    let other = backend.job("https://v/slow-b").await.unwrap().unwrap();
    assert_eq!(other.state, JobState::Running);

    assert_eq!(backend.cancel_all().await.unwrap(), 1);
    next_matching(&mut harness.events, |e| matches!(e, BackendEvent::AllIdle)).await;
    let counters = backend.counters().await.unwrap();
    assert_eq!((counters.active, counters.cancelled), (0, 2));
}

#[tokio::test]
async fn test_ignored_termination_escalates_to_kill() {
    let mut harness = loaded(200).await;
    let backend = harness.backend.clone();

    backend
        .start_one("https://v/stubborn", DownloadOptions::default())
        .await
        .unwrap();
    // Wait until the trap is installed
    next_matching(&mut harness.events, |e| {
        matches!(e, BackendEvent::DownloadStatus { text, .. } if text.contains("waiting"))
    })
    .await;

    assert!(backend.cancel_one("https://v/stubborn").await.unwrap());
    let finished = next_matching(&mut harness.events, finished_for("https://v/stubborn")).await;
    assert!(matches!(
        finished,
        BackendEvent::DownloadFinished { state: JobState::Cancelled, .. }
    ));
    assert_eq!(backend.counters().await.unwrap().active, 0);
}

#[tokio::test]
async fn test_spawn_failure_leaves_no_registry_entry() {
    let dir = tempdir().unwrap();
    let settings = AppSettings {
        download_location: dir.path().to_path_buf(),
        ytdlp_path: Some(dir.path().join("missing-yt-dlp")),
        ..AppSettings::default()
    };
    let lister = Arc::new(YtDlpExtractor::new(settings.ytdlp_path.clone()));
    let (backend, _events) = BackendHandle::spawn(settings, lister);

    assert!(matches!(
        backend.list_playlist("https://list").await,
        Err(LoaderError::ListingUnavailable(_))
    ));

    let result = backend
        .start_one("https://v/anything", DownloadOptions::default())
        .await;
    assert!(matches!(result, Err(LoaderError::DownloadError(_))));

    let counters = backend.counters().await.unwrap();
    assert_eq!((counters.active, counters.failed), (0, 1));
    let view = backend.job("https://v/anything").await.unwrap().unwrap();
    assert!(matches!(view.state, JobState::Failed(reason) if !reason.is_empty()));
}

#[tokio::test]
async fn test_clear_resets_list_and_counters() {
    let mut harness = loaded(5000).await;
    let backend = harness.backend.clone();

    backend
        .start_one("https://v/slow-b", DownloadOptions::default())
        .await
        .unwrap();
    backend.clear().await.unwrap();

    next_matching(&mut harness.events, |e| matches!(e, BackendEvent::AllIdle)).await;
    let counters = backend.counters().await.unwrap();
    assert_eq!(counters.finished(), 0);
    assert_eq!(counters.total, 0);
    assert!(matches!(
        backend.select_videos("1").await,
        Err(LoaderError::NoPlaylistLoaded)
    ));
}

#[tokio::test]
async fn test_concurrent_cancels_issue_one_request() {
    let mut harness = loaded(5000).await;
    let backend = harness.backend.clone();

    backend
        .start_one("https://v/slow-b", DownloadOptions::default())
        .await
        .unwrap();

    let attempts = (0..8).map(|_| backend.cancel_one("https://v/slow-b"));
    let issued = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(true)))
        .count();
    assert_eq!(issued, 1);

    next_matching(&mut harness.events, |e| matches!(e, BackendEvent::AllIdle)).await;
    let counters = backend.counters().await.unwrap();
    assert_eq!((counters.active, counters.cancelled), (0, 1));
}
