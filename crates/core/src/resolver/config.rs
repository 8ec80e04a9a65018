//! Configuration for the resolver module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which resolver implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverBackend {
    /// Resolve through the `yt-dlp` command line tool.
    #[default]
    YtDlp,
    /// Treat every URL as a direct link to the media.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub backend: ResolverBackend,

    /// Path to the yt-dlp binary.
    #[serde(default = "default_yt_dlp_path")]
    pub yt_dlp_path: PathBuf,

    /// yt-dlp format selector.
    #[serde(default = "default_format_selector")]
    pub format_selector: String,

    /// Additional yt-dlp arguments inserted before the URL.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// URLs matching this regex are listed as playlists and expanded into
    /// one job per entry. Empty disables expansion.
    #[serde(default = "default_playlist_url_pattern")]
    pub playlist_url_pattern: String,
}

fn default_yt_dlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_format_selector() -> String {
    "bestaudio/best".to_string()
}

fn default_playlist_url_pattern() -> String {
    r"(?i)^(?:https?://)?[^/?#]+/(?:[^?#]*/)?playlist(?:[/?#]|$)".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backend: ResolverBackend::default(),
            yt_dlp_path: default_yt_dlp_path(),
            format_selector: default_format_selector(),
            extra_args: Vec::new(),
            playlist_url_pattern: default_playlist_url_pattern(),
        }
    }
}
