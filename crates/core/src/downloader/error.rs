//! Error types for the downloader module.

use thiserror::Error;

/// Errors that can occur while fetching a stream.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Server returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection closed before the advertised length arrived.
    #[error("Transfer incomplete: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("Download cancelled")]
    Cancelled,
}
