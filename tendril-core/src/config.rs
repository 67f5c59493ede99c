//! Runtime Configuration
//!
//! Plain data settings for a [`ReactiveGraph`](crate::ReactiveGraph).
//! Handlers (error and warn) are closures and are installed on the graph
//! directly, so they are not part of this struct.

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// How many times one computation may re-queue itself during a single flush
/// before the scheduler reports an infinite update loop.
pub const DEFAULT_MAX_UPDATE_COUNT: usize = 100;

/// Settings for a reactive graph.
///
/// Every field has a default, so partial JSON documents are accepted:
///
/// ```rust
/// use tendril_core::Config;
///
/// let config = Config::from_json(r#"{ "max_update_count": 10 }"#).unwrap();
/// assert_eq!(config.max_update_count, 10);
/// assert!(!config.sync);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Re-queue bound per computation per flush.
    pub max_update_count: usize,

    /// Forced synchronous mode.
    ///
    /// Queued computations flush immediately instead of at the next tick,
    /// and trackers notify subscribers in creation order. Intended for
    /// tests; it defeats batching.
    pub sync: bool,

    /// Suppress warnings.
    pub silent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_update_count: DEFAULT_MAX_UPDATE_COUNT,
            sync: false,
            silent: false,
        }
    }
}

impl Config {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the re-queue bound.
    pub fn with_max_update_count(mut self, max_update_count: usize) -> Self {
        self.max_update_count = max_update_count;
        self
    }

    /// Enable or disable forced synchronous mode.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Enable or disable warning suppression.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.max_update_count, DEFAULT_MAX_UPDATE_COUNT);
        assert!(!config.sync);
        assert!(!config.silent);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = Config::from_json(r#"{ "sync": true }"#).unwrap();
        assert!(config.sync);
        assert_eq!(config.max_update_count, DEFAULT_MAX_UPDATE_COUNT);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = Config::from_json("{ nope").unwrap_err();
        assert!(matches!(err, ReactiveError::Config(_)));
    }

    #[test]
    fn builder_methods() {
        let config = Config::default()
            .with_max_update_count(3)
            .with_sync(true)
            .with_silent(true);
        assert_eq!(config.max_update_count, 3);
        assert!(config.sync);
        assert!(config.silent);
    }
}
