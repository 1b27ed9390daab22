// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request seam to the remote authority.
//!
//! The coordinator never opens connections itself; the host supplies a
//! [`Transport`] (HTTP client, test double, ...) and the coordinator issues
//! metadata, hash and sync calls through it.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, SyncError, CONFLICT_STATUS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// Reply from the remote authority.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Option<Value>,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body: Some(body) }
    }

    pub fn empty() -> Self {
        Self { status: 204, body: None }
    }

    pub fn status(status: u16) -> Self {
        Self { status, body: None }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body unless it is absent, `null` or `{}`.
    pub fn non_empty_body(&self) -> Option<&Value> {
        match &self.body {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(body) => Some(body),
        }
    }

    /// Turn a non-2xx status into a transport error.
    pub fn error_for_status(self, method: Method, uri: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(SyncError::Transport {
            status: Some(self.status),
            message: if self.status == CONFLICT_STATUS {
                format!("{method} {uri}: leaf count conflict")
            } else {
                format!("{method} {uri} returned {}", self.status)
            },
        })
    }

    /// Decode a required body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .non_empty_body()
            .ok_or_else(|| SyncError::malformed("response has no body"))?;
        T::deserialize(body).map_err(|e| SyncError::malformed(format!("unexpected response shape: {e}")))
    }
}

/// Issues requests to the remote authority.
///
/// Implementations return `Err(SyncError::Transport { .. })` for network
/// failures; they may either return non-2xx statuses as `Ok(Response)` or map
/// them to errors themselves. A 409 on a hash query means the remote's leaf
/// count changed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Result<Response>;
}
