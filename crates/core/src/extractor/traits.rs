//! Trait definitions for the extractor module.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::ExtractError;
use super::types::{TranscodeJob, TranscodeResult};
use crate::job::ProgressReporter;

/// Turns downloaded media into an audio file.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Returns the name of this extractor implementation.
    fn name(&self) -> &str;

    /// Transcodes `job.input` into `job.output`.
    ///
    /// Progress is reported as `(current, max)` positions. Implementations
    /// must stop promptly and return [`ExtractError::Cancelled`] once
    /// `cancel` fires. Whatever is left at `job.output` on error is removed
    /// by the caller.
    async fn transcode(
        &self,
        job: &TranscodeJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<TranscodeResult, ExtractError>;

    /// Validates that the extractor is properly configured and ready.
    async fn validate(&self) -> Result<(), ExtractError> {
        Ok(())
    }
}
