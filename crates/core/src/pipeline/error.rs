//! Error types for the pipeline module.

use thiserror::Error;

use crate::downloader::DownloadError;
use crate::job::{JobId, JobState};
use crate::resolver::ResolveError;

/// Errors returned by the pipeline's control surface. Failures inside a
/// job are recorded on the job instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `shutdown` was called; no new runs are accepted.
    #[error("Pipeline is shut down")]
    ShutDown,

    /// Only `Failed` and `Canceled` jobs can be retried.
    #[error("Job {job_id} cannot be retried while {state}")]
    NotRetryable { job_id: JobId, state: JobState },

    /// A playlist URL could not be listed; no jobs were created.
    #[error("Failed to expand {url}: {source}")]
    Expand {
        url: String,
        #[source]
        source: ResolveError,
    },

    /// The default downloader could not be built.
    #[error("Failed to create downloader: {0}")]
    Downloader(#[from] DownloadError),
}
