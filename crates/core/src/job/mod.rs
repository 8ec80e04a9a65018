//! The per-request entity: one URL turned into one audio file.
//!
//! A [`Job`] owns its state machine, stage progress and cancellation scope.
//! The pipeline's run task drives it; observers read it through getters,
//! [`Job::snapshot`] or the pipeline's event stream.
//!
//! Mutators are tagged with the attempt number they were issued for. A retry
//! bumps the attempt, so a run that is still unwinding from the previous
//! attempt can no longer touch the job.

mod event;
mod progress;
mod state;

pub use event::{JobEvent, JobEventKind};
pub use progress::{Progress, ProgressReporter, ProgressUpdate};
pub use state::JobState;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::JobError;
use crate::extractor::AudioFormat;
use crate::resolver::{ResolvedVideo, StreamLocator};

/// Title shown before metadata has been resolved.
pub const UNRESOLVED_TITLE: &str = "<...>";

/// Title shown when the source could not be resolved.
pub const INVALID_SOURCE_TITLE: &str = "<Invalid URL>";

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Point-in-time copy of a job's observable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub source_url: String,
    pub title: String,
    pub format: AudioFormat,
    pub state: JobState,
    pub progress: Progress,
    /// Bytes per second over the last sampling interval.
    pub throughput: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

struct JobInner {
    title: Option<String>,
    stream: Option<StreamLocator>,
    state: JobState,
    progress: Progress,
    throughput: u64,
    bytes_transferred: u64,
    bytes_sampled: u64,
    output_path: Option<PathBuf>,
    temp_path: Option<PathBuf>,
    last_error: Option<Arc<JobError>>,
    cancel: CancellationToken,
    attempt: u32,
}

/// One URL-to-file request.
pub struct Job {
    id: JobId,
    source_url: String,
    format: AudioFormat,
    created_at: DateTime<Utc>,
    inner: Mutex<JobInner>,
    events: broadcast::Sender<JobEvent>,
}

impl Job {
    pub(crate) fn new(
        source_url: impl Into<String>,
        format: AudioFormat,
        cancel: CancellationToken,
        events: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            id: JobId::new(),
            source_url: source_url.into(),
            format,
            created_at: Utc::now(),
            inner: Mutex::new(JobInner {
                title: None,
                stream: None,
                state: JobState::Initializing,
                progress: Progress::RESET,
                throughput: 0,
                bytes_transferred: 0,
                bytes_sampled: 0,
                output_path: None,
                temp_path: None,
                last_error: None,
                cancel,
                attempt: 0,
            }),
            events,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Resolved title, or a placeholder that is never empty.
    pub fn title(&self) -> String {
        self.lock()
            .title
            .clone()
            .unwrap_or_else(|| UNRESOLVED_TITLE.to_string())
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn progress(&self) -> Progress {
        self.lock().progress
    }

    pub fn throughput(&self) -> u64 {
        self.lock().throughput
    }

    /// Reserved output path. Only guaranteed to be a complete file once the
    /// job is `Completed`.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.lock().output_path.clone()
    }

    pub fn temp_path(&self) -> Option<PathBuf> {
        self.lock().temp_path.clone()
    }

    /// The error that failed the job; only set while `Failed`.
    pub fn last_error(&self) -> Option<Arc<JobError>> {
        self.lock().last_error.clone()
    }

    /// Number of retries so far.
    pub fn attempt(&self) -> u32 {
        self.lock().attempt
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.lock();
        JobSnapshot {
            id: self.id,
            source_url: self.source_url.clone(),
            title: inner
                .title
                .clone()
                .unwrap_or_else(|| UNRESOLVED_TITLE.to_string()),
            format: self.format,
            state: inner.state,
            progress: inner.progress,
            throughput: inner.throughput,
            output_path: inner.output_path.clone(),
            last_error: inner.last_error.as_ref().map(|e| e.to_string()),
            attempt: inner.attempt,
            created_at: self.created_at,
        }
    }

    // ------------------------------------------------------------------
    // Driven by the pipeline
    // ------------------------------------------------------------------

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.lock().cancel.clone()
    }

    pub(crate) fn stream(&self) -> Option<StreamLocator> {
        self.lock().stream.clone()
    }

    pub(crate) fn emit_submitted(&self) {
        self.emit(JobEventKind::Submitted {
            url: self.source_url.clone(),
        });
    }

    /// Requests cancellation. No-op if terminal or already cancelling.
    ///
    /// A job still resolving has nothing to unwind and goes straight to
    /// `Canceled`; queued or running jobs pass through `Cancelling` until
    /// their run observes the request.
    pub(crate) fn request_cancel(&self) -> bool {
        let mut inner = self.lock();
        if !inner.state.can_cancel() {
            return false;
        }
        inner.cancel.cancel();
        let next = if inner.state == JobState::Initializing {
            JobState::Canceled
        } else {
            JobState::Cancelling
        };
        self.set_state(&mut inner, next);
        true
    }

    /// Resets a `Failed` or `Canceled` job for another run.
    ///
    /// Returns the new attempt number, or the current state if the job is
    /// not retryable. Jobs that resolved before re-enter at
    /// `QueuedForDownload`; the rest start over at `Initializing`.
    pub(crate) fn prepare_retry(&self, cancel: CancellationToken) -> Result<u32, JobState> {
        let mut inner = self.lock();
        if !inner.state.can_retry() {
            return Err(inner.state);
        }

        inner.attempt += 1;
        inner.cancel = cancel;
        inner.last_error = None;
        inner.output_path = None;
        inner.temp_path = None;
        inner.throughput = 0;
        inner.bytes_transferred = 0;
        inner.bytes_sampled = 0;
        if inner.title.as_deref() == Some(INVALID_SOURCE_TITLE) {
            inner.title = None;
        }

        let next = if inner.stream.is_some() {
            JobState::QueuedForDownload
        } else {
            JobState::Initializing
        };
        self.set_state(&mut inner, next);
        self.set_progress(&mut inner, Progress::RESET);
        Ok(inner.attempt)
    }

    pub(crate) fn set_resolved(&self, attempt: u32, video: ResolvedVideo) -> bool {
        let mut inner = self.lock();
        if inner.attempt != attempt {
            return false;
        }
        let title = video.title;
        inner.stream = Some(video.stream);
        if inner.title.as_deref() != Some(title.as_str()) {
            inner.title = Some(title.clone());
            self.emit(JobEventKind::TitleChanged { title });
        }
        true
    }

    pub(crate) fn set_output_path(&self, attempt: u32, path: Option<PathBuf>) {
        let mut inner = self.lock();
        if inner.attempt == attempt {
            inner.output_path = path;
        }
    }

    pub(crate) fn set_temp_path(&self, attempt: u32, path: Option<PathBuf>) {
        let mut inner = self.lock();
        if inner.attempt == attempt {
            inner.temp_path = path;
        }
    }

    /// Moves the job forward along the pipeline.
    ///
    /// Refused for stale attempts, for terminal jobs, and for moves the
    /// state machine does not allow (for instance out of `Cancelling`).
    /// Entering a stage state resets progress to `(0, unknown)`.
    pub(crate) fn transition(&self, attempt: u32, to: JobState) -> bool {
        let mut inner = self.lock();
        if inner.attempt != attempt || inner.state.is_terminal() {
            return false;
        }
        if inner.state == to {
            return true;
        }
        if !inner.state.can_transition_to(to) {
            debug!(job_id = %self.id, from = %inner.state, to = %to, "Transition refused");
            return false;
        }
        self.set_state(&mut inner, to);
        if to.is_staged() {
            self.set_progress(&mut inner, Progress::RESET);
        }
        true
    }

    /// Settles a run that observed cancellation.
    pub(crate) fn settle_cancelled(&self, attempt: u32) {
        let mut inner = self.lock();
        if inner.attempt != attempt || inner.state.is_terminal() {
            return;
        }
        if inner.state != JobState::Initializing && inner.state != JobState::Cancelling {
            self.set_state(&mut inner, JobState::Cancelling);
        }
        self.set_state(&mut inner, JobState::Canceled);
    }

    /// Settles a run that failed. A cancellation requested in the meantime
    /// takes precedence and the job ends `Canceled` without an error.
    pub(crate) fn settle_failed(&self, attempt: u32, error: JobError) {
        if error.is_cancelled() || self.cancel_token().is_cancelled() {
            self.settle_cancelled(attempt);
            return;
        }

        let mut inner = self.lock();
        if inner.attempt != attempt || inner.state.is_terminal() {
            return;
        }
        if matches!(error, JobError::InvalidSource(_)) {
            inner.title = Some(INVALID_SOURCE_TITLE.to_string());
            self.emit(JobEventKind::TitleChanged {
                title: INVALID_SOURCE_TITLE.to_string(),
            });
        }
        inner.last_error = Some(Arc::new(error));
        self.set_state(&mut inner, JobState::Failed);
    }

    pub(crate) fn apply_progress(&self, attempt: u32, update: ProgressUpdate) {
        let mut inner = self.lock();
        if inner.attempt != attempt || inner.state.is_terminal() {
            return;
        }
        let mut progress = inner.progress;
        match update {
            ProgressUpdate::Length(max) => progress.set_max(max),
            ProgressUpdate::Bytes(n) => {
                inner.bytes_transferred = inner.bytes_transferred.saturating_add(n);
                progress.advance(n);
            }
            ProgressUpdate::Position { current, max } => progress.set(current, max),
        }
        self.set_progress(&mut inner, progress);
    }

    /// Converts bytes moved since the previous sample into a rate. Jobs
    /// outside `Downloading` report zero.
    pub(crate) fn sample_throughput(&self, elapsed: Duration) -> u64 {
        let mut inner = self.lock();
        let delta = inner.bytes_transferred.saturating_sub(inner.bytes_sampled);
        inner.bytes_sampled = inner.bytes_transferred;

        let secs = elapsed.as_secs_f64();
        inner.throughput = if inner.state == JobState::Downloading && secs > 0.0 {
            (delta as f64 / secs) as u64
        } else {
            0
        };
        inner.throughput
    }

    pub(crate) fn progress_reporter(self: &Arc<Self>, attempt: u32) -> ProgressReporter {
        let job = Arc::clone(self);
        ProgressReporter::new(move |update| job.apply_progress(attempt, update))
    }

    fn set_state(&self, inner: &mut JobInner, to: JobState) {
        let from = inner.state;
        inner.state = to;
        if to != JobState::Downloading {
            inner.throughput = 0;
        }
        debug!(job_id = %self.id, %from, %to, "Job state changed");
        self.emit(JobEventKind::StateChanged { from, to });
    }

    fn set_progress(&self, inner: &mut JobInner, progress: Progress) {
        if inner.progress != progress {
            inner.progress = progress;
            self.emit(JobEventKind::ProgressChanged { progress });
        }
    }

    fn emit(&self, kind: JobEventKind) {
        // Having no subscribers is normal.
        let _ = self.events.send(JobEvent::new(self.id, kind));
    }

    fn lock(&self) -> MutexGuard<'_, JobInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("source_url", &self.source_url)
            .field("state", &inner.state)
            .field("attempt", &inner.attempt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::DownloadError;
    use crate::resolver::ResolveError;

    fn job() -> (Arc<Job>, broadcast::Receiver<JobEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let job = Arc::new(Job::new(
            "https://example.com/v",
            AudioFormat::Mp3,
            CancellationToken::new(),
            tx,
        ));
        (job, rx)
    }

    fn resolved(title: &str) -> ResolvedVideo {
        ResolvedVideo {
            title: title.to_string(),
            stream: StreamLocator::new("https://cdn.example.com/v.webm"),
        }
    }

    fn drain_states(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(state) = event.new_state() {
                states.push(state);
            }
        }
        states
    }

    fn run_to(job: &Job, states: &[JobState]) {
        for state in states {
            assert!(job.transition(0, *state), "to {}", state);
        }
    }

    #[test]
    fn test_unresolved_title_is_placeholder() {
        let (job, _rx) = job();
        assert_eq!(job.title(), UNRESOLVED_TITLE);
        assert!(job.set_resolved(0, resolved("Song")));
        assert_eq!(job.title(), "Song");
    }

    #[test]
    fn test_cancel_while_initializing_goes_straight_to_canceled() {
        let (job, mut rx) = job();
        let token = job.cancel_token();

        assert!(job.request_cancel());
        assert!(token.is_cancelled());
        assert_eq!(job.state(), JobState::Canceled);
        assert_eq!(drain_states(&mut rx), vec![JobState::Canceled]);

        // The unwinding run cannot move it anywhere.
        assert!(!job.transition(0, JobState::QueuedForDownload));
        job.settle_cancelled(0);
        assert_eq!(job.state(), JobState::Canceled);
        assert!(!job.request_cancel());
    }

    #[test]
    fn test_cancel_while_running_passes_through_cancelling() {
        let (job, mut rx) = job();
        run_to(&job, &[JobState::QueuedForDownload, JobState::Downloading]);

        assert!(job.request_cancel());
        assert_eq!(job.state(), JobState::Cancelling);
        assert!(!job.transition(0, JobState::QueuedForTranscode));

        job.settle_cancelled(0);
        assert_eq!(job.state(), JobState::Canceled);
        assert!(job.last_error().is_none());
        assert_eq!(
            drain_states(&mut rx),
            vec![
                JobState::QueuedForDownload,
                JobState::Downloading,
                JobState::Cancelling,
                JobState::Canceled
            ]
        );
    }

    #[test]
    fn test_settle_cancelled_without_request_still_shows_cancelling() {
        let (job, mut rx) = job();
        run_to(&job, &[JobState::QueuedForDownload]);
        drain_states(&mut rx);

        job.settle_cancelled(0);
        assert_eq!(
            drain_states(&mut rx),
            vec![JobState::Cancelling, JobState::Canceled]
        );
    }

    #[test]
    fn test_failure_records_error() {
        let (job, _rx) = job();
        run_to(&job, &[JobState::QueuedForDownload, JobState::Downloading]);

        job.settle_failed(0, DownloadError::Status { status: 500, url: "u".into() }.into());
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.last_error().map(|e| e.kind()), Some("transport"));
    }

    #[test]
    fn test_failure_after_cancel_request_is_cancellation() {
        let (job, _rx) = job();
        run_to(&job, &[JobState::QueuedForDownload, JobState::Downloading]);
        job.request_cancel();

        job.settle_failed(0, DownloadError::Incomplete { expected: 2, received: 1 }.into());
        assert_eq!(job.state(), JobState::Canceled);
        assert!(job.last_error().is_none());
    }

    #[test]
    fn test_invalid_source_sets_title() {
        let (job, _rx) = job();
        job.settle_failed(0, ResolveError::invalid_source("u", "bad").into());
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.title(), INVALID_SOURCE_TITLE);

        // Without a resolved stream, a retry starts over from resolution.
        assert_eq!(job.prepare_retry(CancellationToken::new()), Ok(1));
        assert_eq!(job.state(), JobState::Initializing);
        assert_eq!(job.title(), UNRESOLVED_TITLE);
    }

    #[test]
    fn test_missing_resolver_keeps_unresolved_title() {
        let (job, _rx) = job();
        let error = ResolveError::ToolNotFound {
            path: "/usr/bin/yt-dlp".into(),
        };
        job.settle_failed(0, error.into());

        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.title(), UNRESOLVED_TITLE);
        assert_eq!(job.last_error().map(|e| e.kind()), Some("resolution"));
    }

    #[test]
    fn test_retry_resets_and_ignores_stale_attempt() {
        let (job, mut rx) = job();
        job.set_resolved(0, resolved("Song"));
        run_to(&job, &[JobState::QueuedForDownload, JobState::Downloading]);
        job.apply_progress(0, ProgressUpdate::Length(Some(100)));
        job.apply_progress(0, ProgressUpdate::Bytes(40));
        assert_eq!(job.progress(), Progress::new(40, Some(100)));

        assert_eq!(
            job.prepare_retry(CancellationToken::new()),
            Err(JobState::Downloading)
        );

        job.settle_failed(0, DownloadError::Status { status: 503, url: "u".into() }.into());
        drain_states(&mut rx);

        let old_token = job.cancel_token();
        assert_eq!(job.prepare_retry(CancellationToken::new()), Ok(1));
        assert_eq!(job.state(), JobState::QueuedForDownload);
        assert_eq!(job.progress(), Progress::RESET);
        assert!(job.last_error().is_none());
        assert!(!job.cancel_token().is_cancelled());
        assert!(!old_token.is_cancelled());
        assert_eq!(drain_states(&mut rx), vec![JobState::QueuedForDownload]);

        // Leftovers from the first attempt are ignored.
        assert!(!job.transition(0, JobState::Downloading));
        job.apply_progress(0, ProgressUpdate::Bytes(10));
        assert_eq!(job.progress(), Progress::RESET);
        assert!(job.transition(1, JobState::Downloading));
    }

    #[test]
    fn test_stage_entry_resets_progress() {
        let (job, _rx) = job();
        run_to(&job, &[JobState::QueuedForDownload, JobState::Downloading]);
        job.apply_progress(0, ProgressUpdate::Position { current: 5, max: Some(5) });

        assert!(job.transition(0, JobState::QueuedForTranscode));
        assert_eq!(job.progress(), Progress::RESET);
    }

    #[test]
    fn test_throughput_sampling() {
        let (job, _rx) = job();
        run_to(&job, &[JobState::QueuedForDownload, JobState::Downloading]);

        job.apply_progress(0, ProgressUpdate::Bytes(2_000));
        assert_eq!(job.sample_throughput(Duration::from_secs(2)), 1_000);
        assert_eq!(job.sample_throughput(Duration::from_secs(1)), 0);

        job.apply_progress(0, ProgressUpdate::Bytes(500));
        job.transition(0, JobState::QueuedForTranscode);
        assert_eq!(job.sample_throughput(Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let (job, _rx) = job();
        job.set_resolved(0, resolved("Song"));
        let value = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(value["title"], "Song");
        assert_eq!(value["state"], "initializing");
        assert_eq!(value["format"], "mp3");
        assert!(value.get("last_error").is_none());
    }
}
