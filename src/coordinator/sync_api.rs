// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Verification timers and repair rounds.
//!
//! # Round
//!
//! ```text
//! local root == remote root ──► done
//!        │ no
//!        ▼
//! leafCount == 1 ? ──yes──► leaf 0 divergent
//!        │ no
//!        ▼
//! GET <url>/hashtree ──409──► wait for next heartbeat
//!        │
//!        ▼
//! resize, diff leaf hashes ──► POST <url>/sync { divergent leaves } ──► reply fed back in
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::{jittered_delay, TimerHandle};
use crate::error::{Result, SyncError};
use crate::hash_tree::LeafHash;
use crate::message::{DataSetMeta, HashTreeMessage, HashesResponse, LeafDataEntry, SyncDataSet, SyncRequest};
use crate::transport::{Method, Response};

use super::{HashTreeSync, SyncRound, SyncState};

impl HashTreeSync {
    // ═══════════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Resize the data set's tree to its reported leaf count and re-arm its
    /// verification timer with a fresh jittered delay.
    ///
    /// A zero delay leaves any pending timer alone.
    pub(super) fn evaluate(&self, state: &mut SyncState, name: &str) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let Some(data_set) = state.data_sets.get_mut(name) else {
            return Ok(());
        };
        let Some(tree) = data_set.hash_tree.as_mut() else {
            return Ok(());
        };
        tree.resize(data_set.meta.leaf_count)?;

        let delay = jittered_delay(data_set.meta.idle_ms, &data_set.meta.backoff);
        if delay.is_zero() {
            return Ok(());
        }

        data_set.cancel_timer();
        data_set.timer_generation += 1;
        let generation = data_set.timer_generation;
        let inner = Arc::downgrade(&self.inner);
        let timer_name = name.to_string();
        data_set.timer = Some(TimerHandle::spawn(generation, delay, async move {
            if let Some(inner) = inner.upgrade() {
                HashTreeSync { inner }.on_timer(timer_name, generation).await;
            }
        }));

        crate::metrics::record_timer_armed(name);
        debug!(data_set = %name, delay_ms = delay.as_millis() as u64, "Verification timer armed");
        Ok(())
    }

    async fn on_timer(self, name: String, generation: u64) {
        {
            let mut state = self.inner.state.lock();
            match state.data_sets.get_mut(&name) {
                Some(data_set)
                    if data_set.timer.as_ref().map(TimerHandle::generation) == Some(generation) =>
                {
                    data_set.timer = None;
                }
                _ => return,
            }
        }

        match self.sync_now(&name).await {
            Ok(round) => debug!(data_set = %name, ?round, "Verification round finished"),
            Err(e) => error!(data_set = %name, error = %e, "Verification round failed"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Rounds
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run one verification round now, as the timer would.
    ///
    /// Leaf count conflicts end the round quietly; other transport failures
    /// are returned.
    #[instrument(skip(self), fields(debug_id = %self.inner.config.debug_id))]
    pub async fn sync_now(&self, name: &str) -> Result<SyncRound> {
        if self.is_stopped() {
            return Ok(SyncRound::Abandoned);
        }

        let (url, leaf_count) = {
            let state = self.inner.state.lock();
            let data_set = state
                .data_sets
                .get(name)
                .ok_or_else(|| SyncError::UnknownDataSet(name.to_string()))?;
            let Some(tree) = &data_set.hash_tree else {
                return Ok(SyncRound::NoTree);
            };
            if tree.root_hash() == data_set.meta.root {
                return Ok(SyncRound::InSync);
            }
            (data_set.meta.url.clone(), data_set.meta.leaf_count)
        };
        crate::metrics::record_root_mismatch(name);

        let remote = if leaf_count == 1 {
            None
        } else {
            match self.fetch_hashes(name, &url).await {
                Ok(remote) => Some(remote),
                Err(SyncError::LeafCountConflict { .. }) => {
                    info!(data_set = %name, "Leaf count changed remotely; waiting for next heartbeat");
                    return Ok(SyncRound::LeafCountConflict);
                }
                Err(e) => return Err(e),
            }
        };
        if self.is_stopped() {
            return Ok(SyncRound::Abandoned);
        }

        let (leaves, request) = {
            let mut state = self.inner.state.lock();
            if let Some(meta) = remote.as_ref().and_then(|(_, meta)| meta.as_ref()) {
                state.record(std::slice::from_ref(meta));
            }
            let Some(tree) = state
                .data_sets
                .get_mut(name)
                .and_then(|data_set| data_set.hash_tree.as_mut())
            else {
                return Ok(SyncRound::Abandoned);
            };

            let leaves = match &remote {
                None => (0..tree.leaf_count()).collect(),
                Some((hashes, meta)) => {
                    if let Some(meta) = meta {
                        tree.resize(meta.leaf_count)?;
                    }
                    tree.diff_hashes(hashes)
                }
            };
            if leaves.is_empty() {
                return Ok(SyncRound::NoDivergentLeaves);
            }

            let request = SyncRequest {
                data_set: SyncDataSet {
                    name: name.to_string(),
                    leaf_count: tree.leaf_count(),
                    root: tree.root_hash(),
                },
                leaf_data_entries: leaves
                    .iter()
                    .map(|&leaf_index| LeafDataEntry {
                        leaf_index,
                        element_ids: tree.leaf_data(leaf_index),
                    })
                    .collect(),
            };
            (leaves, request)
        };

        crate::metrics::record_divergent_leaves(name, leaves.len());
        debug!(data_set = %name, leaves = ?leaves, "Requesting repair of divergent leaves");

        let response = match self.post_sync(&url, &request).await? {
            Some(message) => Some(self.process_message(message)?),
            None => None,
        };
        Ok(SyncRound::Repaired { leaves, response })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Requests
    // ═══════════════════════════════════════════════════════════════════════════

    /// Issue a request, mapping non-2xx statuses to errors and recording metrics.
    pub(super) async fn request(
        &self,
        endpoint: &'static str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Result<Response> {
        let _timer = crate::time_request!(endpoint);
        let result = self
            .inner
            .transport
            .request(method, uri, body)
            .await
            .and_then(|response| response.error_for_status(method, uri));

        let status = match &result {
            Ok(response) => response.status.to_string(),
            Err(SyncError::Transport { status: Some(status), .. }) => status.to_string(),
            Err(_) => "error".to_string(),
        };
        crate::metrics::record_request(endpoint, &status);
        result
    }

    /// GET the remote's node hashes for a data set.
    async fn fetch_hashes(&self, name: &str, url: &str) -> Result<(Vec<LeafHash>, Option<DataSetMeta>)> {
        let uri = self.inner.config.hashtree_url(url);
        let response = self
            .request("hashtree", Method::Get, &uri, None)
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    SyncError::LeafCountConflict {
                        data_set: name.to_string(),
                    }
                } else {
                    e
                }
            })?;

        let body: HashesResponse = response.json().inspect_err(|e| {
            warn!(data_set = %name, error = %e, "Malformed hash response");
        })?;
        let Some(hashes) = body.hashes else {
            warn!(data_set = %name, "Hash response has no hashes");
            return Err(SyncError::malformed("hash response has no hashes"));
        };
        if let Some(meta) = &body.data_set {
            meta.validate()?;
        }
        Ok((hashes, body.data_set))
    }

    /// POST a sync request. A non-empty reply is a full update message.
    pub(super) async fn post_sync(&self, url: &str, request: &SyncRequest) -> Result<Option<HashTreeMessage>> {
        let uri = self.inner.config.sync_url(url);
        let body = serde_json::to_value(request)?;
        let response = self.request("sync", Method::Post, &uri, Some(body)).await?;

        let Some(body) = response.non_empty_body() else {
            return Ok(None);
        };
        HashTreeMessage::deserialize(body).map(Some).map_err(|e| {
            warn!(error = %e, "Malformed sync response");
            SyncError::malformed(format!("unexpected sync response shape: {e}"))
        })
    }
}
