//! Error types for the resolver module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving a source URL.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The URL does not identify a resolvable item.
    #[error("Invalid source '{url}': {reason}")]
    InvalidSource { url: String, reason: String },

    /// The resolver tool is not installed.
    #[error("Resolver tool not found at path: {path}")]
    ToolNotFound { path: PathBuf },

    /// The resolver tool ran but failed.
    #[error("Resolver tool failed: {reason}")]
    ToolFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// The resolver tool produced output we could not understand.
    #[error("Failed to parse resolver output: {reason}")]
    Parse { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn invalid_source(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
