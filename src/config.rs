// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the reconciliation coordinator.
//!
//! # Example
//!
//! ```
//! use hashtree_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.end_of_session_data_set, "main");
//!
//! // Custom endpoints
//! let config = SyncConfig {
//!     hashtree_path: "/tree".into(),
//!     debug_id: "meeting-42".into(),
//!     ..Default::default()
//! };
//! assert_eq!(config.sync_path, "/sync");
//! ```

use serde::Deserialize;

/// Configuration for [`HashTreeSync`](crate::HashTreeSync).
///
/// All fields have defaults matching the remote authority's conventions.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Data set whose collapse to a single empty leaf signals session end
    #[serde(default = "default_end_of_session_data_set")]
    pub end_of_session_data_set: String,

    /// Suffix appended to a data set URL to query its leaf hashes
    #[serde(default = "default_hashtree_path")]
    pub hashtree_path: String,

    /// Suffix appended to a data set URL to post a sync request
    #[serde(default = "default_sync_path")]
    pub sync_path: String,

    /// Recorded on tracing spans to tell instances apart
    #[serde(default)]
    pub debug_id: String,
}

fn default_end_of_session_data_set() -> String { "main".to_string() }
fn default_hashtree_path() -> String { "/hashtree".to_string() }
fn default_sync_path() -> String { "/sync".to_string() }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            end_of_session_data_set: default_end_of_session_data_set(),
            hashtree_path: default_hashtree_path(),
            sync_path: default_sync_path(),
            debug_id: String::new(),
        }
    }
}

impl SyncConfig {
    pub(crate) fn hashtree_url(&self, data_set_url: &str) -> String {
        format!("{}{}", data_set_url.trim_end_matches('/'), self.hashtree_path)
    }

    pub(crate) fn sync_url(&self, data_set_url: &str) -> String {
        format!("{}{}", data_set_url.trim_end_matches('/'), self.sync_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_partial_config() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"debug_id": "abc"}"#).unwrap();
        assert_eq!(config.debug_id, "abc");
        assert_eq!(config.end_of_session_data_set, "main");
        assert_eq!(config.hashtree_path, "/hashtree");
    }

    #[test]
    fn test_endpoint_urls() {
        let config = SyncConfig::default();
        assert_eq!(
            config.hashtree_url("https://locus/ds/main/"),
            "https://locus/ds/main/hashtree"
        );
        assert_eq!(
            config.sync_url("https://locus/ds/main"),
            "https://locus/ds/main/sync"
        );
    }
}
