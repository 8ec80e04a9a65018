//! Mock extractor for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::mock_downloader::ActiveCounter;
use super::Gate;
use crate::extractor::{AudioExtractor, ExtractError, TranscodeJob, TranscodeResult};
use crate::job::ProgressReporter;

/// Simulated media duration reported as progress, in microseconds.
const MOCK_DURATION_US: u64 = 1_000_000;

/// Mock implementation of the AudioExtractor trait.
///
/// "Transcodes" by copying the input to the output. A closed gate parks the
/// call after it has reported its starting position.
#[derive(Debug)]
pub struct MockExtractor {
    /// If set, the next transcode writes a partial output and fails with this.
    next_error: Arc<RwLock<Option<ExtractError>>>,
    /// Every job passed to `transcode`, in call order.
    jobs: Arc<RwLock<Vec<TranscodeJob>>>,
    /// Time a cancelled transcode takes to wind down before returning.
    cancel_delay: Arc<RwLock<Duration>>,
    counter: ActiveCounter,
    gate: Gate,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            next_error: Arc::new(RwLock::new(None)),
            jobs: Arc::new(RwLock::new(Vec::new())),
            cancel_delay: Arc::new(RwLock::new(Duration::ZERO)),
            counter: ActiveCounter::default(),
            gate: Gate::new(),
        }
    }

    /// Configure the next transcode to fail with the given error.
    pub async fn set_next_error(&self, error: ExtractError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make a transcode cancelled at the gate linger for `delay` first.
    pub async fn set_cancel_delay(&self, delay: Duration) {
        *self.cancel_delay.write().await = delay;
    }

    pub async fn recorded_jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.read().await.clone()
    }

    pub fn active(&self) -> usize {
        self.counter.active()
    }

    pub fn max_active(&self) -> usize {
        self.counter.max_active()
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    async fn run(
        &self,
        job: &TranscodeJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<TranscodeResult, ExtractError> {
        if !tokio::fs::try_exists(&job.input).await? {
            return Err(ExtractError::InputNotFound {
                path: job.input.clone(),
            });
        }
        progress.report_position(0, Some(MOCK_DURATION_US));

        if let Some(error) = self.next_error.write().await.take() {
            tokio::fs::write(&job.output, b"partial").await?;
            return Err(error);
        }
        if !self.gate.pass(cancel).await {
            let delay = *self.cancel_delay.read().await;
            tokio::time::sleep(delay).await;
            return Err(ExtractError::Cancelled);
        }

        let size = tokio::fs::copy(&job.input, &job.output).await?;
        progress.report_position(MOCK_DURATION_US, Some(MOCK_DURATION_US));

        Ok(TranscodeResult {
            output_path: job.output.clone(),
            output_size_bytes: size,
            duration_ms: MOCK_DURATION_US / 1000,
        })
    }
}

#[async_trait]
impl AudioExtractor for MockExtractor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcode(
        &self,
        job: &TranscodeJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<TranscodeResult, ExtractError> {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        self.jobs.write().await.push(job.clone());
        self.counter.enter();
        let result = self.run(job, progress, cancel).await;
        self.counter.leave();
        result
    }
}
