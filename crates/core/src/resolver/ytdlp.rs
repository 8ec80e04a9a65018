//! Resolver backed by the `yt-dlp` command line tool.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use super::config::ResolverConfig;
use super::error::ResolveError;
use super::traits::VideoResolver;
use super::types::{ResolvedVideo, StreamLocator};

/// Runs `yt-dlp --dump-single-json` and reads the selected format from it.
///
/// URLs matching the configured playlist pattern are listed with
/// `--flat-playlist` by [`expand`](VideoResolver::expand).
pub struct YtDlpResolver {
    config: ResolverConfig,
    playlist_pattern: Option<Regex>,
}

#[derive(Debug, Deserialize)]
struct DumpOutput {
    title: Option<String>,
    url: Option<String>,
    ext: Option<String>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    #[serde(rename = "_type")]
    kind: Option<String>,
    #[serde(default)]
    entries: Vec<FlatEntry>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    url: Option<String>,
    webpage_url: Option<String>,
}

impl YtDlpResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let playlist_pattern = match config.playlist_url_pattern.as_str() {
            "" => None,
            pattern => Regex::new(pattern)
                .map_err(|e| warn!(error = %e, "Ignoring invalid playlist URL pattern"))
                .ok(),
        };
        Self {
            config,
            playlist_pattern,
        }
    }

    fn is_playlist_url(&self, url: &str) -> bool {
        self.playlist_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(url))
    }

    pub fn with_defaults() -> Self {
        Self::new(ResolverConfig::default())
    }

    fn build_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--format".to_string(),
            self.config.format_selector.clone(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    fn build_playlist_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--flat-playlist".to_string(),
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    /// Entry URLs of a flat playlist listing; `url` itself if the listing
    /// is a single item.
    fn parse_playlist(url: &str, stdout: &str) -> Result<Vec<String>, ResolveError> {
        let listing: FlatPlaylist =
            serde_json::from_str(stdout).map_err(|e| ResolveError::Parse {
                reason: format!("Failed to parse yt-dlp playlist: {}", e),
            })?;

        if listing.kind.as_deref() != Some("playlist") {
            return Ok(vec![url.to_string()]);
        }

        let urls: Vec<String> = listing
            .entries
            .into_iter()
            .filter_map(|entry| entry.webpage_url.or(entry.url))
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(ResolveError::invalid_source(url, "playlist has no entries"));
        }
        Ok(urls)
    }

    async fn run(&self, url: &str, args: Vec<String>) -> Result<String, ResolveError> {
        let output = Command::new(&self.config.yt_dlp_path)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ResolveError::ToolNotFound {
                        path: self.config.yt_dlp_path.clone(),
                    }
                } else {
                    ResolveError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::invalid_source(url, Self::error_summary(&stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_output(url: &str, stdout: &str) -> Result<ResolvedVideo, ResolveError> {
        let dump: DumpOutput = serde_json::from_str(stdout).map_err(|e| ResolveError::Parse {
            reason: format!("Failed to parse yt-dlp output: {}", e),
        })?;

        let stream_url = dump
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ResolveError::invalid_source(url, "no downloadable stream"))?;

        let title = dump
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| url.to_string());

        Ok(ResolvedVideo {
            title,
            stream: StreamLocator {
                url: stream_url,
                extension: dump.ext,
                headers: dump.http_headers,
            },
        })
    }

    /// First `ERROR:` line of yt-dlp's stderr, or its last line.
    fn error_summary(stderr: &str) -> String {
        stderr
            .lines()
            .find_map(|l| l.strip_prefix("ERROR:").map(str::trim))
            .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
            .unwrap_or("yt-dlp exited with an error")
            .to_string()
    }
}

#[async_trait]
impl VideoResolver for YtDlpResolver {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedVideo, ResolveError> {
        debug!(url, "Resolving with yt-dlp");
        let stdout = self.run(url, self.build_args(url)).await?;
        Self::parse_output(url, &stdout)
    }

    async fn expand(&self, url: &str) -> Result<Vec<String>, ResolveError> {
        if !self.is_playlist_url(url) {
            return Ok(vec![url.to_string()]);
        }

        debug!(url, "Listing playlist with yt-dlp");
        let stdout = self.run(url, self.build_playlist_args(url)).await?;
        let urls = Self::parse_playlist(url, &stdout)?;
        debug!(url, entries = urls.len(), "Playlist listed");
        Ok(urls)
    }
}
