//! Trait definitions for the downloader module.

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;
use crate::job::ProgressReporter;
use crate::resolver::StreamLocator;

/// Fetches the bytes behind a [`StreamLocator`] into a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Returns the name of this downloader implementation.
    fn name(&self) -> &str;

    /// Writes the stream to `dest`, creating or truncating it, and returns
    /// the number of bytes written.
    ///
    /// The total length is reported once known and every received chunk is
    /// reported as it is written. Returns [`DownloadError::Cancelled`] once
    /// `cancel` fires; a partial `dest` is left for the caller to remove.
    async fn fetch(
        &self,
        stream: &StreamLocator,
        dest: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError>;
}
