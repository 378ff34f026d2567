//! Graph configuration

use crate::error::GraphResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How closure rows are repaired after a link is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalStrategy {
    /// Re-examine only rows inside the removed edge's ancestor/descendant cone
    #[default]
    Cone,
    /// Drop the whole closure and replay every eligible link
    FullRebuild,
}

/// Configuration for a [`ProvenanceGraph`](crate::ProvenanceGraph)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Key prefix marking producer-set attributes
    pub internal_prefix: String,
    /// Closure repair strategy on link removal
    pub removal: RemovalStrategy,
    /// Snapshot location used by `open` and `flush`
    pub snapshot_path: Option<PathBuf>,
    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_filter: String,
}

impl GraphConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a different internal key prefix
    #[inline]
    #[must_use]
    pub fn with_internal_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.internal_prefix = prefix.into();
        self
    }

    /// With a closure repair strategy
    #[inline]
    #[must_use]
    pub fn with_removal(mut self, removal: RemovalStrategy) -> Self {
        self.removal = removal;
        self
    }

    /// With a snapshot location
    #[inline]
    #[must_use]
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// With a default log filter
    #[inline]
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Load configuration from a json file; missing fields take defaults
    ///
    /// # Errors
    /// Io or serialization failure
    pub fn from_json_file(path: impl AsRef<Path>) -> GraphResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Whether `key` is a producer-set (internal) attribute key
    #[inline]
    #[must_use]
    pub fn is_internal_key(&self, key: &str) -> bool {
        !self.internal_prefix.is_empty() && key.starts_with(&self.internal_prefix)
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            internal_prefix: "_".to_string(),
            removal: RemovalStrategy::Cone,
            snapshot_path: None,
            log_filter: "info".to_string(),
        }
    }
}
