//! Stage-scoped progress counters and the callback collaborators report through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Progress within the current stage.
///
/// `max` is `None` until the stage learns its total. Once known,
/// `current <= max` holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub max: Option<u64>,
}

impl Progress {
    /// `(0, unknown)`, the value every stage starts from.
    pub const RESET: Progress = Progress {
        current: 0,
        max: None,
    };

    pub fn new(current: u64, max: Option<u64>) -> Self {
        let mut progress = Self::RESET;
        progress.set(current, max);
        progress
    }

    /// Fraction complete in `0.0..=1.0`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.max {
            Some(0) => Some(1.0),
            Some(max) => Some(self.current as f64 / max as f64),
            None => None,
        }
    }

    pub(crate) fn set(&mut self, current: u64, max: Option<u64>) {
        self.current = current;
        self.max = max;
        self.clamp();
    }

    pub(crate) fn set_max(&mut self, max: Option<u64>) {
        self.max = max;
        self.clamp();
    }

    pub(crate) fn advance(&mut self, n: u64) {
        self.current = self.current.saturating_add(n);
        self.clamp();
    }

    /// Collaborators are allowed to underestimate the total; the bound grows
    /// rather than letting `current` exceed it.
    fn clamp(&mut self) {
        if let Some(max) = self.max {
            if self.current > max {
                self.max = Some(self.current);
            }
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}/{}", self.current, max),
            None => write!(f, "{}/?", self.current),
        }
    }
}

/// A single progress report from a stage collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Total size of the stage became known (or is known to be unknown).
    Length(Option<u64>),
    /// `n` more bytes were transferred.
    Bytes(u64),
    /// Absolute position, e.g. encoded time against total duration.
    Position { current: u64, max: Option<u64> },
}

/// Cheaply cloneable progress callback handed to collaborators.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(ProgressUpdate) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(ProgressUpdate) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// A reporter that discards everything.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, update: ProgressUpdate) {
        (self.sink)(update);
    }

    pub fn report_length(&self, max: Option<u64>) {
        self.report(ProgressUpdate::Length(max));
    }

    pub fn report_bytes(&self, n: u64) {
        self.report(ProgressUpdate::Bytes(n));
    }

    pub fn report_position(&self, current: u64, max: Option<u64>) {
        self.report(ProgressUpdate::Position { current, max });
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}
