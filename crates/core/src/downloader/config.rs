//! Configuration for the downloader module.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// TCP connect timeout. Transfers themselves have no deadline; long
    /// stalls end only through cancellation.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// User-Agent sent unless the stream locator supplies its own.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Write buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("audiograb/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_buffer_size() -> usize {
    64 * 1024
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
            buffer_size: default_buffer_size(),
        }
    }
}
