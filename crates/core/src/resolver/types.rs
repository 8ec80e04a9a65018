//! Types for the resolver module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where and how to fetch the media bytes for a resolved item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLocator {
    /// Direct media URL.
    pub url: String,
    /// Container extension reported by the source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Extra request headers the source requires.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl StreamLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Metadata resolved from a source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVideo {
    pub title: String,
    pub stream: StreamLocator,
}
