//! Change notifications emitted by jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::Progress;
use super::state::JobState;
use super::JobId;

/// A discrete change to one job, delivered over a broadcast channel.
///
/// Consumers that render a UI are responsible for moving these onto their
/// own thread; the core never blocks on a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    /// The job was accepted by the pipeline.
    Submitted { url: String },
    /// The job moved between states.
    StateChanged { from: JobState, to: JobState },
    /// Progress within the current stage changed.
    ProgressChanged { progress: Progress },
    /// The displayed title changed.
    TitleChanged { title: String },
}

impl JobEvent {
    pub fn new(job_id: JobId, kind: JobEventKind) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Returns the new state if this is a state change.
    pub fn new_state(&self) -> Option<JobState> {
        match self.kind {
            JobEventKind::StateChanged { to, .. } => Some(to),
            _ => None,
        }
    }
}
