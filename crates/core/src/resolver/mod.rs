//! Metadata resolution: source URL to title and stream locator.

mod config;
mod direct;
mod error;
mod traits;
mod types;
mod ytdlp;

use std::sync::Arc;

pub use config::{ResolverBackend, ResolverConfig};
pub use direct::DirectResolver;
pub use error::ResolveError;
pub use traits::VideoResolver;
pub use types::{ResolvedVideo, StreamLocator};
pub use ytdlp::YtDlpResolver;

/// Factory function to create a resolver from config.
pub fn create_resolver(config: &ResolverConfig) -> Arc<dyn VideoResolver> {
    match config.backend {
        ResolverBackend::YtDlp => Arc::new(YtDlpResolver::new(config.clone())),
        ResolverBackend::Direct => Arc::new(DirectResolver::new()),
    }
}
