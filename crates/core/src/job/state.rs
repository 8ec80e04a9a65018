//! Job lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a job is in the pipeline.
///
/// Each stage is split into a queued state (waiting for the stage permit)
/// and a running state (holding it), so observers can tell "waiting for a
/// shared resource" apart from "using it".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    // ========================================================================
    // Resolution
    // ========================================================================
    /// Resolving metadata and reserving the output name.
    Initializing,

    // ========================================================================
    // Download stage
    // ========================================================================
    /// Waiting for the download stage permit.
    QueuedForDownload,
    /// Holding the download permit, transferring bytes.
    Downloading,

    // ========================================================================
    // Transcode stage
    // ========================================================================
    /// Waiting for the transcode stage permit.
    QueuedForTranscode,
    /// Holding the transcode permit, encoding audio.
    Transcoding,

    // ========================================================================
    // Outcomes
    // ========================================================================
    /// Output file is complete.
    Completed,
    /// Stopped on an error, see the job's last error.
    Failed,
    /// Cancellation requested; the run has not unwound yet.
    Cancelling,
    /// Cancellation confirmed.
    Canceled,
}

impl JobState {
    /// Returns true if no further transition happens without a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Returns true for every non-terminal state, `Cancelling` included.
    pub fn is_running(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true while the job holds, or waits for, a stage permit.
    pub fn is_staged(&self) -> bool {
        matches!(
            self,
            Self::QueuedForDownload | Self::Downloading | Self::QueuedForTranscode | Self::Transcoding
        )
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal() && *self != Self::Cancelling
    }

    pub fn can_retry(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        match (*self, next) {
            (Initializing, QueuedForDownload)
            | (QueuedForDownload, Downloading)
            | (Downloading, QueuedForTranscode)
            | (QueuedForTranscode, Transcoding)
            | (Transcoding, Completed) => true,

            // Nothing to unwind before the first stage.
            (Initializing, Canceled) => true,
            (Cancelling, Canceled) => true,

            (from, Cancelling) | (from, Failed) => from.is_running() && from != Cancelling,

            // Retry. Jobs that never resolved start over from resolution.
            (Failed | Canceled, QueuedForDownload | Initializing) => true,

            _ => false,
        }
    }

    /// Short label, e.g. for a status column.
    pub fn display_text(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing...",
            Self::QueuedForDownload | Self::QueuedForTranscode => "In queue",
            Self::Downloading => "Downloading video...",
            Self::Transcoding => "Converting to audio...",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelling => "Cancelling...",
            Self::Canceled => "Cancelled",
        }
    }

    /// Longer human readable description.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing...",
            Self::QueuedForDownload => "Waiting in queue for other downloads to end...",
            Self::Downloading => "Downloading video...",
            Self::QueuedForTranscode => "Waiting in queue for other conversions to end...",
            Self::Transcoding => "Converting video to audio file...",
            Self::Completed => "Completed with success.",
            Self::Failed => "Failed.",
            Self::Cancelling => "Cancelling operation...",
            Self::Canceled => "Cancelled by user.",
        }
    }

    /// Stable snake_case name, as used in serialized form and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::QueuedForDownload => "queued_for_download",
            Self::Downloading => "downloading",
            Self::QueuedForTranscode => "queued_for_transcode",
            Self::Transcoding => "transcoding",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelling => "cancelling",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
