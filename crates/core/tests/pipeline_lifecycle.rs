//! Pipeline lifecycle integration tests.
//!
//! These tests drive the pipeline with mock collaborators:
//! - Job state transitions (initializing -> queued -> downloading -> ... -> completed)
//! - FIFO admission and stage capacity limits
//! - Cancellation, retry and shutdown
//! - Cleanup of placeholder and temp files on failure
//! - Playlist expansion at submission

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use audiograb_core::{
    extractor::ExtractError,
    job::{Job, JobEventKind, JobState, Progress, INVALID_SOURCE_TITLE, UNRESOLVED_TITLE},
    testing::{fixtures, MockDownloader, MockExtractor, MockResolver, StageCall},
    DownloadError, Pipeline, PipelineConfig, PipelineError, ResolverConfig, YtDlpResolver,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Test helper wiring a pipeline to mock collaborators in a temp directory.
struct TestHarness {
    pipeline: Pipeline,
    resolver: Arc<MockResolver>,
    downloader: Arc<MockDownloader>,
    extractor: Arc<MockExtractor>,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new(download: usize, transcode: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = fixtures::pipeline_config(temp_dir.path(), download, transcode);
        Self::with_config(config, temp_dir)
    }

    fn with_config(config: PipelineConfig, temp_dir: TempDir) -> Self {
        let resolver = Arc::new(MockResolver::new());
        let downloader = Arc::new(MockDownloader::new());
        let extractor = Arc::new(MockExtractor::new());

        let pipeline = Pipeline::new(
            config,
            resolver.clone(),
            downloader.clone(),
            extractor.clone(),
        );

        Self {
            pipeline,
            resolver,
            downloader,
            extractor,
            temp_dir,
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join("out")
    }

    /// Files currently in the output directory.
    fn output_files(&self) -> BTreeSet<String> {
        list_files(&self.output_dir())
    }

    fn temp_files(&self) -> BTreeSet<String> {
        list_files(&self.temp_dir.path().join("tmp"))
    }
}

fn list_files(dir: &Path) -> BTreeSet<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => BTreeSet::new(),
    }
}

/// Poll until the job reaches `expected`. Fails fast if it settles elsewhere.
async fn wait_for_state(job: &Job, expected: JobState) {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        let state = job.state();
        if state == expected {
            return;
        }
        if state.is_terminal() && !expected.is_terminal() {
            panic!("job settled in {} while waiting for {}", state, expected);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "timed out waiting for {}, job is {}",
        expected,
        job.state()
    );
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > TIMEOUT {
            panic!("timed out waiting until {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_job_completes_end_to_end() {
    let harness = TestHarness::new(1, 1);
    harness
        .resolver
        .set_title("https://v.example/watch?v=1", "Artist - Song")
        .await;
    let mut events = harness.pipeline.subscribe();

    let job = harness
        .pipeline
        .submit("https://v.example/watch?v=1")
        .unwrap();
    wait_for_state(&job, JobState::Completed).await;

    let output = job.output_path().expect("output path recorded");
    assert_eq!(output, harness.output_dir().join("Artist - Song.mp3"));
    let payload = b"mock media stream ".repeat(64);
    assert_eq!(std::fs::read(&output).unwrap(), payload);
    assert!(harness.temp_files().is_empty());
    assert!(job.last_error().is_none());
    assert_eq!(job.title(), "Artist - Song");

    let mut states = Vec::new();
    let mut submitted = false;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, job.id());
        match event.kind {
            JobEventKind::Submitted { .. } => {
                assert!(states.is_empty(), "submitted must come first");
                submitted = true;
            }
            JobEventKind::StateChanged { to, .. } => states.push(to),
            _ => {}
        }
    }
    assert!(submitted);
    assert_eq!(
        states,
        vec![
            JobState::QueuedForDownload,
            JobState::Downloading,
            JobState::QueuedForTranscode,
            JobState::Transcoding,
            JobState::Completed,
        ]
    );

    harness.pipeline.wait_idle().await;
    let status = harness.pipeline.status();
    assert_eq!(status.jobs_registered, 0);
    assert_eq!(status.download_stage.available, 1);
    assert_eq!(status.transcode_stage.available, 1);
    assert_eq!(status.jobs_by_state.get(&JobState::Completed), Some(&1));
}

#[tokio::test]
async fn test_identical_titles_get_distinct_paths() {
    let harness = TestHarness::new(2, 2);
    harness.resolver.set_title("https://v.example/a", "Same").await;
    harness.resolver.set_title("https://v.example/b", "Same").await;

    let a = harness.pipeline.submit("https://v.example/a").unwrap();
    let b = harness.pipeline.submit("https://v.example/b").unwrap();
    wait_for_state(&a, JobState::Completed).await;
    wait_for_state(&b, JobState::Completed).await;

    let paths: BTreeSet<PathBuf> = [a.output_path().unwrap(), b.output_path().unwrap()]
        .into_iter()
        .collect();
    let expected: BTreeSet<PathBuf> = [
        harness.output_dir().join("Same.mp3"),
        harness.output_dir().join("Same (2).mp3"),
    ]
    .into_iter()
    .collect();
    assert_eq!(paths, expected);
}

#[tokio::test]
async fn test_unsafe_title_is_sanitized() {
    let harness = TestHarness::new(1, 1);
    harness
        .resolver
        .set_title("https://v.example/x", "AC/DC: Live?")
        .await;

    let job = harness.pipeline.submit("https://v.example/x").unwrap();
    wait_for_state(&job, JobState::Completed).await;

    assert_eq!(
        harness.output_files(),
        BTreeSet::from(["AC_DC_ Live_.mp3".to_string()])
    );
}

// =============================================================================
// Stage admission
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_stage_admits_in_submission_order() {
    let harness = TestHarness::new(1, 2);
    harness.downloader.gate().close();

    let a = harness.pipeline.submit("https://v.example/a").unwrap();
    wait_for_state(&a, JobState::Downloading).await;
    let b = harness.pipeline.submit("https://v.example/b").unwrap();
    wait_for_state(&b, JobState::QueuedForDownload).await;

    // B stays queued while A holds the only download permit.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.state(), JobState::QueuedForDownload);
    assert_eq!(harness.downloader.started_count().await, 1);
    assert_eq!(harness.pipeline.status().download_stage.waiting, 1);

    harness.downloader.gate().open();
    wait_for_state(&a, JobState::Completed).await;
    wait_for_state(&b, JobState::Completed).await;

    assert_eq!(
        harness.downloader.calls().await,
        vec![
            StageCall::Started("https://v.example/a".to_string()),
            StageCall::Finished("https://v.example/a".to_string()),
            StageCall::Started("https://v.example/b".to_string()),
            StageCall::Finished("https://v.example/b".to_string()),
        ]
    );
    assert_eq!(harness.downloader.max_active(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transcode_stage_capacity_is_respected() {
    let harness = TestHarness::new(4, 2);
    harness.extractor.gate().close();

    let jobs: Vec<_> = (0..4)
        .map(|i| {
            harness
                .pipeline
                .submit(format!("https://v.example/{}", i))
                .unwrap()
        })
        .collect();

    let extractor = harness.extractor.clone();
    wait_until("two transcodes run", || extractor.active() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.extractor.active(), 2);

    let queued = jobs
        .iter()
        .filter(|j| j.state() == JobState::QueuedForTranscode)
        .count();
    assert_eq!(queued, 2);
    // Waiting for transcode never holds a download permit.
    assert_eq!(harness.pipeline.status().download_stage.available, 4);

    harness.extractor.gate().open();
    for job in &jobs {
        wait_for_state(job, JobState::Completed).await;
    }
    assert_eq!(harness.extractor.max_active(), 2);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_transcode_failure_cleans_up_files() {
    let harness = TestHarness::new(1, 1);
    harness
        .extractor
        .set_next_error(ExtractError::conversion_failed("exit status 1", None))
        .await;

    let job = harness.pipeline.submit("https://v.example/broken").unwrap();
    wait_for_state(&job, JobState::Failed).await;

    let output = job.output_path().expect("output path recorded");
    let temp = job.temp_path().expect("temp path recorded");
    assert!(!output.exists());
    assert!(!temp.exists());
    assert!(harness.output_files().is_empty());

    let error = job.last_error().expect("failure carries an error");
    assert_eq!(error.kind(), "transcode");
    assert!(!error.to_string().is_empty());
}

#[tokio::test]
async fn test_download_failure_does_not_affect_siblings() {
    let harness = TestHarness::new(1, 1);
    harness
        .downloader
        .set_next_error(DownloadError::Status {
            status: 503,
            url: "https://v.example/a".to_string(),
        })
        .await;

    let a = harness.pipeline.submit("https://v.example/a").unwrap();
    wait_for_state(&a, JobState::Failed).await;
    let b = harness.pipeline.submit("https://v.example/b").unwrap();
    wait_for_state(&b, JobState::Completed).await;

    assert_eq!(a.last_error().map(|e| e.kind()), Some("transport"));
    assert_eq!(harness.output_files(), BTreeSet::from(["b.mp3".to_string()]));

    harness.pipeline.wait_idle().await;
    assert_eq!(harness.pipeline.status().download_stage.available, 1);
}

#[tokio::test]
async fn test_invalid_source_fails_with_placeholder_title() {
    let harness = TestHarness::new(1, 1);
    harness.resolver.set_invalid("not a url").await;

    let job = harness.pipeline.submit("not a url").unwrap();
    wait_for_state(&job, JobState::Failed).await;

    assert_eq!(job.title(), INVALID_SOURCE_TITLE);
    assert_eq!(job.last_error().map(|e| e.kind()), Some("invalid_source"));
    assert!(job.output_path().is_none());
    assert_eq!(harness.pipeline.status().download_stage.requests, 0);
}

#[tokio::test]
async fn test_resolver_missing_keeps_unresolved_title() {
    let harness = TestHarness::new(1, 1);
    harness.resolver.set_invalid("https://v.example/gone").await;

    let job = harness.pipeline.submit("https://v.example/gone").unwrap();
    wait_for_state(&job, JobState::Failed).await;
    assert_eq!(job.title(), INVALID_SOURCE_TITLE);

    // A resolver that cannot run says nothing about the URL.
    let resolver = YtDlpResolver::new(ResolverConfig {
        yt_dlp_path: PathBuf::from("/nonexistent/audiograb/yt-dlp"),
        ..Default::default()
    });
    let pipeline = Pipeline::new(
        fixtures::pipeline_config(harness.temp_dir.path(), 1, 1),
        Arc::new(resolver),
        harness.downloader.clone(),
        harness.extractor.clone(),
    );
    let job = pipeline.submit("https://v.example/watch?v=1").unwrap();
    wait_for_state(&job, JobState::Failed).await;

    assert_eq!(job.title(), UNRESOLVED_TITLE);
    assert_eq!(job.last_error().map(|e| e.kind()), Some("resolution"));
}

// =============================================================================
// Playlists
// =============================================================================

#[tokio::test]
async fn test_playlist_expands_into_one_job_per_entry() {
    let harness = TestHarness::new(1, 1);
    let entries: Vec<String> = (1..=3)
        .map(|i| format!("https://v.example/watch?v={}", i))
        .collect();
    harness
        .resolver
        .set_playlist("https://v.example/playlist?list=mix", entries.clone())
        .await;

    let jobs = harness
        .pipeline
        .submit_expanded("https://v.example/playlist?list=mix")
        .await
        .unwrap();

    let urls: Vec<&str> = jobs.iter().map(|job| job.source_url()).collect();
    assert_eq!(urls, entries);
    for job in &jobs {
        wait_for_state(job, JobState::Completed).await;
    }
    assert_eq!(harness.output_files().len(), 3);
    assert_eq!(harness.pipeline.jobs().len(), 3);
}

#[tokio::test]
async fn test_plain_url_expands_to_single_job() {
    let harness = TestHarness::new(1, 1);

    let jobs = harness
        .pipeline
        .submit_expanded("https://v.example/watch?v=1")
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    wait_for_state(&jobs[0], JobState::Completed).await;
}

#[tokio::test]
async fn test_unlistable_playlist_submits_nothing() {
    let harness = TestHarness::new(1, 1);
    harness
        .resolver
        .set_invalid("https://v.example/playlist?list=gone")
        .await;

    let result = harness
        .pipeline
        .submit_expanded("https://v.example/playlist?list=gone")
        .await;

    assert!(matches!(result, Err(PipelineError::Expand { .. })));
    assert!(harness.pipeline.jobs().is_empty());
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_while_initializing_never_requests_a_permit() {
    let harness = TestHarness::new(1, 1);
    harness.resolver.gate().close();

    let job = harness.pipeline.submit("https://v.example/slow").unwrap();
    let resolver = harness.resolver.clone();
    let start = Instant::now();
    while resolver.call_count().await == 0 {
        assert!(start.elapsed() < TIMEOUT, "resolver never called");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(job.state(), JobState::Initializing);

    assert!(harness.pipeline.cancel(&job));
    assert_eq!(job.state(), JobState::Canceled);
    assert!(!harness.pipeline.cancel(&job));

    harness.pipeline.wait_idle().await;
    let status = harness.pipeline.status();
    assert_eq!(status.download_stage.requests, 0);
    assert_eq!(status.transcode_stage.requests, 0);
    assert!(harness.output_files().is_empty());
    assert!(job.last_error().is_none());
}

#[tokio::test]
async fn test_cancel_while_downloading_passes_through_cancelling() {
    let harness = TestHarness::new(1, 1);
    harness.downloader.gate().close();
    let mut events = harness.pipeline.subscribe();

    let job = harness.pipeline.submit("https://v.example/a").unwrap();
    wait_for_state(&job, JobState::Downloading).await;

    assert!(harness.pipeline.cancel(&job));
    wait_for_state(&job, JobState::Canceled).await;
    harness.pipeline.wait_idle().await;

    let states: Vec<JobState> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| e.new_state())
        .collect();
    assert_eq!(
        &states[states.len() - 2..],
        &[JobState::Cancelling, JobState::Canceled]
    );
    assert!(harness.output_files().is_empty());
    assert!(harness.temp_files().is_empty());
    assert_eq!(harness.pipeline.status().download_stage.available, 1);
}

#[tokio::test]
async fn test_cancel_all_replaces_scope_for_new_submissions() {
    let harness = TestHarness::new(1, 1);
    harness.resolver.gate().close();

    let first = harness.pipeline.submit("https://v.example/first").unwrap();
    harness.pipeline.cancel_all();
    wait_for_state(&first, JobState::Canceled).await;

    harness.resolver.gate().open();
    let second = harness.pipeline.submit("https://v.example/second").unwrap();
    wait_for_state(&second, JobState::Completed).await;
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test]
async fn test_retry_resets_progress_and_requeues() {
    let harness = TestHarness::new(1, 1);
    harness
        .downloader
        .set_next_error(DownloadError::Status {
            status: 503,
            url: "https://v.example/a".to_string(),
        })
        .await;

    let job = harness.pipeline.submit("https://v.example/a").unwrap();
    wait_for_state(&job, JobState::Failed).await;
    assert_ne!(job.progress(), Progress::RESET);

    let mut events = harness.pipeline.subscribe();
    harness.pipeline.retry(&job).unwrap();
    wait_for_state(&job, JobState::Completed).await;

    let after_retry: Vec<JobEventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        after_retry.first(),
        Some(&JobEventKind::StateChanged {
            from: JobState::Failed,
            to: JobState::QueuedForDownload,
        })
    );
    assert_eq!(
        after_retry.get(1),
        Some(&JobEventKind::ProgressChanged {
            progress: Progress::RESET,
        })
    );

    assert_eq!(job.attempt(), 1);
    assert!(job.last_error().is_none());
    // Metadata resolved by the first attempt is reused.
    assert_eq!(harness.resolver.call_count().await, 1);
}

#[tokio::test]
async fn test_retry_rejects_non_terminal_and_completed_jobs() {
    let harness = TestHarness::new(1, 1);
    let job = harness.pipeline.submit("https://v.example/a").unwrap();
    wait_for_state(&job, JobState::Completed).await;

    let err = harness.pipeline.retry(&job).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NotRetryable {
            state: JobState::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_retry_after_cancel_runs_again() {
    let harness = TestHarness::new(1, 1);
    harness.extractor.gate().close();

    let job = harness.pipeline.submit("https://v.example/a").unwrap();
    wait_for_state(&job, JobState::Transcoding).await;
    harness.pipeline.cancel(&job);
    wait_for_state(&job, JobState::Canceled).await;

    harness.extractor.gate().open();
    harness.pipeline.retry(&job).unwrap();
    wait_for_state(&job, JobState::Completed).await;
    assert_eq!(harness.output_files(), BTreeSet::from(["a.mp3".to_string()]));
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_cancels_jobs_mid_transcode() {
    let harness = TestHarness::new(3, 3);
    harness.extractor.gate().close();

    let jobs: Vec<_> = (0..3)
        .map(|i| {
            harness
                .pipeline
                .submit(format!("https://v.example/{}", i))
                .unwrap()
        })
        .collect();
    let extractor = harness.extractor.clone();
    wait_until("three transcodes run", || extractor.active() == 3).await;

    harness.pipeline.shutdown().await;

    for job in &jobs {
        assert_eq!(job.state(), JobState::Canceled);
        assert!(job.last_error().is_none());
    }
    assert_eq!(harness.extractor.active(), 0);
    assert!(harness.output_files().is_empty());
    assert!(harness.temp_files().is_empty());

    let status = harness.pipeline.status();
    assert!(!status.accepting);
    assert_eq!(status.transcode_stage.available, 3);

    assert!(matches!(
        harness.pipeline.submit("https://v.example/late"),
        Err(PipelineError::ShutDown)
    ));
    assert!(matches!(
        harness.pipeline.retry(&jobs[0]),
        Err(PipelineError::ShutDown)
    ));

    // A second shutdown is a no-op.
    harness.pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_idle_waits_for_runs_to_unwind_during_shutdown() {
    let harness = TestHarness::new(1, 1);
    harness.extractor.gate().close();
    harness
        .extractor
        .set_cancel_delay(Duration::from_millis(200))
        .await;

    let job = harness.pipeline.submit("https://v.example/slow").unwrap();
    wait_for_state(&job, JobState::Transcoding).await;

    let pipeline = &harness.pipeline;
    let idle = async {
        // Let shutdown start first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.wait_idle().await;
        (job.state(), pipeline.has_running_jobs(), harness.output_files())
    };
    let ((state, running, outputs), ()) = tokio::join!(idle, pipeline.shutdown());

    assert_eq!(state, JobState::Canceled);
    assert!(!running);
    assert!(outputs.is_empty());
    assert_eq!(harness.pipeline.status().jobs_registered, 0);
}
