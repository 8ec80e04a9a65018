//! Streaming HTTP downloader.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::DownloaderConfig;
use super::error::DownloadError;
use super::traits::Downloader;
use crate::job::ProgressReporter;
use crate::resolver::StreamLocator;

/// Downloads with a single streaming GET request.
pub struct HttpDownloader {
    client: Client,
    buffer_size: usize,
}

impl HttpDownloader {
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            buffer_size: config.buffer_size.max(1),
        })
    }

    fn request(&self, stream: &StreamLocator) -> reqwest::RequestBuilder {
        let mut request = self.client.get(&stream.url);
        for (name, value) in &stream.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => request = request.header(name, value),
                _ => debug!(header = %name, "Skipping invalid stream header"),
            }
        }
        request
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(
        &self,
        stream: &StreamLocator,
        dest: &Path,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.request(stream).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                status: status.as_u16(),
                url: stream.url.clone(),
            });
        }

        let expected = response.content_length();
        progress.report_length(expected);
        debug!(url = %stream.url, ?expected, dest = %dest.display(), "Download started");

        let file = File::create(dest).await?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let mut body = response.bytes_stream();
        let mut received: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            writer.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress.report_bytes(chunk.len() as u64);
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        if let Some(expected) = expected {
            if received < expected {
                return Err(DownloadError::Incomplete { expected, received });
            }
        }

        Ok(received)
    }
}
