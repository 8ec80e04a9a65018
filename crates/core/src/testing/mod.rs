//! Testing utilities and mock collaborators for pipeline tests.
//!
//! The mocks implement the resolver, downloader and extractor traits without
//! touching the network or spawning processes. Each one can be held open at
//! a [`Gate`], told to fail its next call, and asked what it was called with.
//!
//! # Example
//!
//! ```rust,ignore
//! use audiograb_core::testing::{MockDownloader, MockExtractor, MockResolver};
//!
//! let resolver = Arc::new(MockResolver::new());
//! let downloader = Arc::new(MockDownloader::new());
//! let extractor = Arc::new(MockExtractor::new());
//!
//! extractor.gate().close();
//! resolver.set_title("https://v.example/1", "Song").await;
//!
//! let pipeline = Pipeline::new(config, resolver, downloader, extractor.clone());
//! ```

mod mock_downloader;
mod mock_extractor;
mod mock_resolver;

pub use mock_downloader::{MockDownloader, StageCall};
pub use mock_extractor::MockExtractor;
pub use mock_resolver::MockResolver;

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A latch that mock operations wait on before finishing.
///
/// Open by default. Closing it makes every operation that reaches it park
/// until it is opened again or the operation is cancelled.
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { open: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Waits until the gate is open. Returns false if `cancel` fired first.
    pub async fn pass(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.open.subscribe();
        loop {
            let open = *rx.borrow_and_update();
            if open {
                return true;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::pipeline::PipelineConfig;
    use crate::resolver::{ResolvedVideo, StreamLocator};

    /// Pipeline config rooted in `dir` with explicit stage capacities and a
    /// fast throughput sampler.
    pub fn pipeline_config(dir: &Path, download: usize, transcode: usize) -> PipelineConfig {
        let mut config = PipelineConfig::in_dir(dir).with_concurrency(download, transcode);
        config.throughput_interval_ms = 50;
        config
    }

    /// A resolved video whose stream points back at the source URL.
    pub fn resolved_video(url: &str, title: &str) -> ResolvedVideo {
        ResolvedVideo {
            title: title.to_string(),
            stream: StreamLocator::new(url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_blocks_until_opened() {
        let gate = Gate::new();
        gate.close();
        assert!(!gate.is_open());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.pass(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.open();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_gate_pass_cancelled() {
        let gate = Gate::new();
        gate.close();
        let token = CancellationToken::new();
        token.cancel();
        assert!(!gate.pass(&token).await);
    }
}
