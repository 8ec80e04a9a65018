//! Mock resolver for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::Gate;
use crate::resolver::{ResolveError, ResolvedVideo, StreamLocator, VideoResolver};

/// Mock implementation of the VideoResolver trait.
///
/// Resolves every URL to a stream at the same URL. The title is the one set
/// with [`set_title`](Self::set_title), else the URL's last path segment.
#[derive(Debug, Default)]
pub struct MockResolver {
    /// Titles by source URL.
    titles: Arc<RwLock<HashMap<String, String>>>,
    /// URLs that fail with `InvalidSource`.
    invalid: Arc<RwLock<HashSet<String>>>,
    /// Entry URLs by playlist URL.
    playlists: Arc<RwLock<HashMap<String, Vec<String>>>>,
    /// Every URL passed to `resolve`, in call order.
    calls: Arc<RwLock<Vec<String>>>,
    gate: Gate,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_title(&self, url: impl Into<String>, title: impl Into<String>) {
        self.titles.write().await.insert(url.into(), title.into());
    }

    /// Make `url` fail resolution.
    pub async fn set_invalid(&self, url: impl Into<String>) {
        self.invalid.write().await.insert(url.into());
    }

    /// Make `url` expand to `entries`.
    pub async fn set_playlist(&self, url: impl Into<String>, entries: Vec<String>) {
        self.playlists.write().await.insert(url.into(), entries);
    }

    pub async fn clear_invalid(&self) {
        self.invalid.write().await.clear();
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Gate every resolution waits on; the pipeline's cancellation is the
    /// only way out while it is closed.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    fn default_title(url: &str) -> String {
        url.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or(url)
            .to_string()
    }
}

#[async_trait]
impl VideoResolver for MockResolver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedVideo, ResolveError> {
        self.calls.write().await.push(url.to_string());
        self.gate.pass(&CancellationToken::new()).await;

        if self.invalid.read().await.contains(url) {
            return Err(ResolveError::invalid_source(url, "mock: unresolvable"));
        }

        let title = self
            .titles
            .read()
            .await
            .get(url)
            .cloned()
            .unwrap_or_else(|| Self::default_title(url));

        Ok(ResolvedVideo {
            title,
            stream: StreamLocator::new(url),
        })
    }

    async fn expand(&self, url: &str) -> Result<Vec<String>, ResolveError> {
        if self.invalid.read().await.contains(url) {
            return Err(ResolveError::invalid_source(url, "mock: unresolvable"));
        }
        Ok(self
            .playlists
            .read()
            .await
            .get(url)
            .cloned()
            .unwrap_or_else(|| vec![url.to_string()]))
    }
}
