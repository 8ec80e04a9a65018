//! Mock downloader for testing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::Gate;
use crate::downloader::{DownloadError, Downloader};
use crate::job::ProgressReporter;
use crate::resolver::StreamLocator;

/// One entry in a mock stage's call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageCall {
    Started(String),
    Finished(String),
}

/// Tracks concurrent calls and the highest concurrency seen.
#[derive(Debug, Default)]
pub(super) struct ActiveCounter {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ActiveCounter {
    pub(super) fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    pub(super) fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub(super) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(super) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Mock implementation of the Downloader trait.
///
/// Writes a fixed payload to the destination in two chunks, reporting the
/// length first and bytes per chunk. The gate is checked between the
/// chunks, so a closed gate leaves a half-written file behind until the
/// call is cancelled.
#[derive(Debug)]
pub struct MockDownloader {
    payload: Arc<RwLock<Vec<u8>>>,
    /// If set, the next fetch writes half the payload and fails with this.
    next_error: Arc<RwLock<Option<DownloadError>>>,
    calls: Arc<RwLock<Vec<StageCall>>>,
    counter: ActiveCounter,
    gate: Gate,
}

impl Default for MockDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDownloader {
    pub fn new() -> Self {
        Self {
            payload: Arc::new(RwLock::new(b"mock media stream ".repeat(64))),
            next_error: Arc::new(RwLock::new(None)),
            calls: Arc::new(RwLock::new(Vec::new())),
            counter: ActiveCounter::default(),
            gate: Gate::new(),
        }
    }

    pub async fn set_payload(&self, payload: Vec<u8>) {
        *self.payload.write().await = payload;
    }

    /// Configure the next fetch to fail with the given error.
    pub async fn set_next_error(&self, error: DownloadError) {
        *self.next_error.write().await = Some(error);
    }

    /// Started/finished log, in the order calls entered and left.
    pub async fn calls(&self) -> Vec<StageCall> {
        self.calls.read().await.clone()
    }

    pub async fn started_count(&self) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| matches!(c, StageCall::Started(_)))
            .count()
    }

    pub fn active(&self) -> usize {
        self.counter.active()
    }

    pub fn max_active(&self) -> usize {
        self.counter.max_active()
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    async fn write_payload(
        &self,
        dest: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let payload = self.payload.read().await.clone();
        let (head, tail) = payload.split_at(payload.len() / 2);
        progress.report_length(Some(payload.len() as u64));

        tokio::fs::write(dest, head).await?;
        progress.report_bytes(head.len() as u64);

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        if !self.gate.pass(cancel).await {
            return Err(DownloadError::Cancelled);
        }

        tokio::fs::write(dest, &payload).await?;
        progress.report_bytes(tail.len() as u64);
        Ok(payload.len() as u64)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        stream: &StreamLocator,
        dest: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        self.counter.enter();
        self.calls
            .write()
            .await
            .push(StageCall::Started(stream.url.clone()));

        let result = self.write_payload(dest, progress, cancel).await;

        self.calls
            .write()
            .await
            .push(StageCall::Finished(stream.url.clone()));
        self.counter.leave();
        result
    }
}
