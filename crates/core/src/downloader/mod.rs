//! Download stage: stream locator to local temp file.

mod config;
mod error;
mod http;
mod traits;

pub use config::DownloaderConfig;
pub use error::DownloadError;
pub use http::HttpDownloader;
pub use traits::Downloader;
