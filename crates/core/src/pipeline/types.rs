//! Status types for the pipeline module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::job::JobState;
use crate::sync::FairSemaphore;

/// Admission status of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub name: String,
    pub capacity: usize,
    pub available: usize,
    pub waiting: usize,
    /// Permit acquisitions ever requested.
    pub requests: u64,
}

impl StageStatus {
    pub(crate) fn of(semaphore: &FairSemaphore) -> Self {
        Self {
            name: semaphore.name().to_string(),
            capacity: semaphore.capacity(),
            available: semaphore.available(),
            waiting: semaphore.waiting(),
            requests: semaphore.requests(),
        }
    }

    /// Permits currently held.
    pub fn active(&self) -> usize {
        self.capacity.saturating_sub(self.available)
    }
}

/// Overall pipeline status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// False once shutdown has started.
    pub accepting: bool,
    pub download_stage: StageStatus,
    pub transcode_stage: StageStatus,
    /// Runs currently in flight.
    pub jobs_registered: usize,
    /// Every known job, by state.
    pub jobs_by_state: BTreeMap<JobState, usize>,
    /// Summed bytes per second of all downloading jobs.
    pub throughput: u64,
}
