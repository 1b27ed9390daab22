// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for hash tree reconciliation.

use thiserror::Error;

/// HTTP-style status the remote authority uses for a leaf count conflict.
pub const CONFLICT_STATUS: u16 = 409;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Leaf count is neither zero nor a power of two. Never retried.
    #[error("Invalid leaf count {leaf_count}: must be 0 or a power of two")]
    Configuration { leaf_count: usize },

    /// Request failed, or the remote returned something we could not use.
    #[error("Transport error (status {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The remote's leaf count changed since our last heartbeat.
    #[error("Leaf count conflict for data set '{data_set}'")]
    LeafCountConflict { data_set: String },

    #[error("Unknown data set '{0}'")]
    UnknownDataSet(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Transport error for a response missing required content.
    pub fn malformed(message: impl Into<String>) -> Self {
        SyncError::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// True for a 409 transport reply or an explicit conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::LeafCountConflict { .. }
                | SyncError::Transport {
                    status: Some(CONFLICT_STATUS),
                    ..
                }
        )
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Configuration { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
