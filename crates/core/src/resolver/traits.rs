//! Trait definitions for the resolver module.

use async_trait::async_trait;

use super::error::ResolveError;
use super::types::ResolvedVideo;

/// Resolves a user-supplied URL into a title and a fetchable stream.
///
/// Cancellation is handled by the caller dropping the returned future, so
/// implementations must not leave work running once dropped.
#[async_trait]
pub trait VideoResolver: Send + Sync {
    /// Returns the name of this resolver implementation.
    fn name(&self) -> &str;

    /// Resolves `url`. Fails with [`ResolveError::InvalidSource`] when the
    /// URL does not identify a resolvable item.
    async fn resolve(&self, url: &str) -> Result<ResolvedVideo, ResolveError>;

    /// Lists the item URLs behind `url`, in order. A URL that is not a
    /// playlist expands to itself.
    async fn expand(&self, url: &str) -> Result<Vec<String>, ResolveError> {
        Ok(vec![url.to_string()])
    }
}
