//! One attempt of one job, from resolution to a settled terminal state.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::scheduler::{Shared, DOWNLOAD_STAGE, TRANSCODE_STAGE};
use crate::error::JobError;
use crate::extractor::TranscodeJob;
use crate::job::{Job, JobState, ProgressReporter, ProgressUpdate};
use crate::metrics;
use crate::sync::ScopedPermit;

pub(crate) struct JobRun {
    shared: Arc<Shared>,
    job: Arc<Job>,
    attempt: u32,
    cancel: CancellationToken,
    /// Output placeholder created by this run.
    reserved: Option<PathBuf>,
    /// Intermediate download written by this run.
    temp: Option<PathBuf>,
}

impl JobRun {
    pub(crate) fn new(shared: Arc<Shared>, job: Arc<Job>, attempt: u32) -> Self {
        let cancel = job.cancel_token();
        Self {
            shared,
            job,
            attempt,
            cancel,
            reserved: None,
            temp: None,
        }
    }

    pub(crate) async fn execute(mut self) {
        let span = info_span!(
            "job",
            job_id = %self.job.id(),
            url = %self.job.source_url(),
            attempt = self.attempt
        );
        async move {
            let result = self.drive().await;
            self.finish(result).await;
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<(), JobError> {
        self.check_cancelled()?;

        if self.job.stream().is_none() {
            let resolved = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(JobError::Cancelled),
                resolved = self.shared.resolver.resolve(self.job.source_url()) => resolved?,
            };
            debug!(title = %resolved.title, "Source resolved");
            self.job.set_resolved(self.attempt, resolved);
        }

        let output = self
            .shared
            .names
            .reserve(
                &self.shared.config.output_dir,
                &self.job.title(),
                self.job.format().extension(),
            )
            .await
            .map_err(JobError::Reservation)?;
        self.reserved = Some(output.clone());
        self.job.set_output_path(self.attempt, Some(output.clone()));

        self.check_cancelled()?;
        self.advance(JobState::QueuedForDownload)?;

        let input = self.download().await?;
        self.transcode(input, output).await
    }

    async fn download(&mut self) -> Result<PathBuf, JobError> {
        let mut permit = ScopedPermit::new(&self.shared.download_stage, self.cancel.clone());
        let queued_at = Instant::now();
        permit.acquired().await.map_err(|_| JobError::Cancelled)?;
        metrics::STAGE_WAIT
            .with_label_values(&[DOWNLOAD_STAGE])
            .observe(queued_at.elapsed().as_secs_f64());

        self.advance(JobState::Downloading)?;

        let temp_dir = &self.shared.config.temp_dir;
        tokio::fs::create_dir_all(temp_dir)
            .await
            .map_err(|e| JobError::Transport(e.into()))?;
        let temp = temp_dir.join(format!("{}-{}.download", self.job.id(), self.attempt));
        self.temp = Some(temp.clone());
        self.job.set_temp_path(self.attempt, Some(temp.clone()));

        let stream = self.job.stream().ok_or(JobError::Cancelled)?;
        let inner = self.job.progress_reporter(self.attempt);
        let reporter = ProgressReporter::new(move |update| {
            if let ProgressUpdate::Bytes(n) = update {
                metrics::BYTES_DOWNLOADED.inc_by(n);
            }
            inner.report(update);
        });

        let started = Instant::now();
        let result = self
            .shared
            .downloader
            .fetch(&stream, &temp, &reporter, &self.cancel)
            .await;
        metrics::STAGE_DURATION
            .with_label_values(&[DOWNLOAD_STAGE])
            .observe(started.elapsed().as_secs_f64());
        permit.release();

        let bytes = result?;
        info!(bytes, "Download finished");
        self.check_cancelled()?;
        self.advance(JobState::QueuedForTranscode)?;
        Ok(temp)
    }

    async fn transcode(&mut self, input: PathBuf, output: PathBuf) -> Result<(), JobError> {
        let mut permit = ScopedPermit::new(&self.shared.transcode_stage, self.cancel.clone());
        let queued_at = Instant::now();
        permit.acquired().await.map_err(|_| JobError::Cancelled)?;
        metrics::STAGE_WAIT
            .with_label_values(&[TRANSCODE_STAGE])
            .observe(queued_at.elapsed().as_secs_f64());

        self.advance(JobState::Transcoding)?;

        let request = TranscodeJob {
            input,
            output,
            format: self.job.format(),
            title: Some(self.job.title()),
        };
        let reporter = self.job.progress_reporter(self.attempt);

        let started = Instant::now();
        let result = self
            .shared
            .extractor
            .transcode(&request, &reporter, &self.cancel)
            .await;
        metrics::STAGE_DURATION
            .with_label_values(&[TRANSCODE_STAGE])
            .observe(started.elapsed().as_secs_f64());
        permit.release();

        let transcoded = result?;
        info!(
            output = %transcoded.output_path.display(),
            size = transcoded.output_size_bytes,
            "Transcode finished"
        );
        self.check_cancelled()
    }

    async fn finish(&mut self, result: Result<(), JobError>) {
        if let Some(temp) = self.temp.take() {
            remove_quietly(&temp).await;
        }

        let outcome = match result {
            Ok(()) if self.job.transition(self.attempt, JobState::Completed) => {
                info!(title = %self.job.title(), "Job completed");
                "completed"
            }
            Ok(()) => {
                // Cancelled between the last stage and completion.
                self.discard_output().await;
                self.job.settle_cancelled(self.attempt);
                "canceled"
            }
            Err(e) => {
                self.discard_output().await;
                if e.is_cancelled() || self.cancel.is_cancelled() {
                    info!("Job cancelled");
                    self.job.settle_cancelled(self.attempt);
                    "canceled"
                } else {
                    error!(error = %e, kind = e.kind(), "Job failed");
                    self.job.settle_failed(self.attempt, e);
                    "failed"
                }
            }
        };

        metrics::JOBS_FINISHED.with_label_values(&[outcome]).inc();
        self.shared.unregister(self.job.id(), self.attempt);
    }

    async fn discard_output(&mut self) {
        if let Some(output) = self.reserved.take() {
            remove_quietly(&output).await;
        }
    }

    fn advance(&self, to: JobState) -> Result<(), JobError> {
        if self.job.transition(self.attempt, to) {
            Ok(())
        } else {
            Err(JobError::Cancelled)
        }
    }

    fn check_cancelled(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}
