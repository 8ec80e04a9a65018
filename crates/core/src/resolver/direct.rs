//! Resolver for URLs that already point at media.

use async_trait::async_trait;
use reqwest::Url;

use super::error::ResolveError;
use super::traits::VideoResolver;
use super::types::{ResolvedVideo, StreamLocator};

/// Uses the URL itself as the stream; the title is the percent-decoded last
/// path segment without its extension.
#[derive(Debug, Default)]
pub struct DirectResolver;

impl DirectResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoResolver for DirectResolver {
    fn name(&self) -> &str {
        "direct"
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedVideo, ResolveError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| ResolveError::invalid_source(url, e.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolveError::invalid_source(
                url,
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        let file_name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            });

        let (title, extension) = match file_name {
            Some(name) => match name.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                    (stem.to_string(), Some(ext.to_ascii_lowercase()))
                }
                _ => (name, None),
            },
            None => (parsed.host_str().unwrap_or("download").to_string(), None),
        };

        Ok(ResolvedVideo {
            title,
            stream: StreamLocator {
                url: parsed.to_string(),
                extension,
                headers: Default::default(),
            },
        })
    }
}
