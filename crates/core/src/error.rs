//! Job-level error taxonomy.

use thiserror::Error;

use crate::downloader::DownloadError;
use crate::extractor::ExtractError;
use crate::resolver::ResolveError;

/// Why a job stopped short of `Completed`.
///
/// Every error raised inside a job's run ends up here and is recorded on the
/// job; it never reaches the pipeline or sibling jobs. `Cancelled` is a
/// normal outcome and is never stored as a job's last error.
#[derive(Debug, Error)]
pub enum JobError {
    /// The URL could not be resolved to a downloadable item.
    #[error("Invalid source: {0}")]
    InvalidSource(#[source] ResolveError),

    /// Resolution could not run or its result was unusable; the URL itself
    /// may be fine.
    #[error("Resolution failed: {0}")]
    Resolution(#[source] ResolveError),

    /// The download stage failed.
    #[error("Transport error: {0}")]
    Transport(#[source] DownloadError),

    /// The transcode stage failed.
    #[error("Transcode error: {0}")]
    Transcode(#[source] ExtractError),

    /// No output name could be reserved.
    #[error("Failed to reserve output file: {0}")]
    Reservation(#[source] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl JobError {
    /// Short machine-readable kind, used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSource(_) => "invalid_source",
            Self::Resolution(_) => "resolution",
            Self::Transport(_) => "transport",
            Self::Transcode(_) => "transcode",
            Self::Reservation(_) => "reservation",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ResolveError> for JobError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Cancelled => Self::Cancelled,
            e @ ResolveError::InvalidSource { .. } => Self::InvalidSource(e),
            other => Self::Resolution(other),
        }
    }
}

impl From<DownloadError> for JobError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

impl From<ExtractError> for JobError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Cancelled => Self::Cancelled,
            other => Self::Transcode(other),
        }
    }
}
