// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator lifecycle: bootstrap, initialization syncs, teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::discovery::{discover, group_by_data_set};
use crate::error::{Result, SyncError};
use crate::hash_tree::HashTree;
use crate::message::{DataSetMeta, DataSetsResponse, HashTreeMessage, LeafDataEntry, SyncDataSet, SyncRequest};
use crate::transport::{Method, Transport};

use super::types::{InitTicket, PendingInit};
use super::{Bootstrap, HashTreeSync, Inner, SyncState, UpdateCallback};

/// Where a snapshot advertises the visible data sets endpoint.
const SNAPSHOT_DATA_SETS_POINTER: &str = "/links/resources/visibleDataSets/url";

impl HashTreeSync {
    /// Build a coordinator from a snapshot.
    ///
    /// Every active data set with known metadata gets a tree pre-seeded with
    /// the items discovered in `bootstrap.state`. Other data sets are recorded
    /// metadata-only.
    pub fn new(
        config: SyncConfig,
        bootstrap: Bootstrap,
        transport: Arc<dyn Transport>,
        on_update: UpdateCallback,
    ) -> Result<Self> {
        for meta in &bootstrap.data_sets {
            meta.validate()?;
        }

        let mut state = SyncState::default();
        state.record(&bootstrap.data_sets);
        state.active = bootstrap.active_data_sets.into_iter().collect();

        let discovered = discover(&bootstrap.state);
        let mut grouped = group_by_data_set(&discovered);

        for name in &state.active {
            let items = grouped.remove(name).unwrap_or_default();
            match state.data_sets.get_mut(name) {
                Some(data_set) => {
                    let tree = HashTree::new(items, data_set.meta.leaf_count)?;
                    crate::metrics::set_tree_items(name, tree.total_item_count());
                    data_set.hash_tree = Some(tree);
                }
                None if !items.is_empty() => {
                    warn!(data_set = %name, items = items.len(), "Active data set has no metadata; items not seeded");
                }
                None => {}
            }
        }
        for (name, items) in &grouped {
            debug!(data_set = %name, items = items.len(), "Ignoring items of inactive data set");
        }

        crate::metrics::set_active_data_sets(state.live_count());
        info!(
            debug_id = %config.debug_id,
            data_sets = state.data_sets.len(),
            live = state.live_count(),
            objects = discovered.len(),
            "Hash tree coordinator bootstrapped"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                transport,
                on_update,
                stopped: AtomicBool::new(false),
                init_serial: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Fetch metadata from the URL advertised in `snapshot` and run an
    /// initialization sync for every active data set without a tree.
    ///
    /// A snapshot with no such URL is logged and skipped.
    #[tracing::instrument(skip(self, snapshot), fields(debug_id = %self.inner.config.debug_id))]
    pub async fn initialize_from_snapshot(&self, snapshot: &Value) -> Result<()> {
        let Some(url) = snapshot.pointer(SNAPSHOT_DATA_SETS_POINTER).and_then(Value::as_str) else {
            warn!("Snapshot has no visible data sets URL; skipping initialization");
            return Ok(());
        };
        self.initialize(url).await
    }

    /// Like [`initialize_from_snapshot`](Self::initialize_from_snapshot), for
    /// a client that joins from a message instead of a snapshot.
    #[tracing::instrument(skip(self, message), fields(debug_id = %self.inner.config.debug_id))]
    pub async fn initialize_from_message(&self, message: &HashTreeMessage) -> Result<()> {
        for meta in &message.data_sets {
            meta.validate()?;
        }
        self.inner.state.lock().record(&message.data_sets);

        let Some(url) = message.visible_data_sets_url.as_deref() else {
            warn!("Message has no visible data sets URL; skipping initialization");
            return Ok(());
        };
        self.initialize(url).await
    }

    async fn initialize(&self, url: &str) -> Result<()> {
        let _serial = self.inner.init_serial.lock().await;
        let metas = self.fetch_data_sets(url).await?;

        let names = {
            let mut state = self.inner.state.lock();
            state.visible_data_sets_url = Some(url.to_string());
            state.record(&metas);
            let active: Vec<String> = state.active.iter().cloned().collect();
            allocate_empty_trees(&mut state, active)?
        };

        info!(data_sets = names.len(), "Starting initialization syncs");
        for name in names {
            self.initialization_sync(&name).await?;
        }
        Ok(())
    }

    /// GET the visible data sets endpoint.
    pub(super) async fn fetch_data_sets(&self, url: &str) -> Result<Vec<DataSetMeta>> {
        let response = self.request("data_sets", Method::Get, url, None).await?;
        let body: DataSetsResponse = response.json()?;
        if body.data_sets.is_empty() {
            warn!(url = %url, "Visible data sets response is empty");
            return Err(SyncError::malformed("visible data sets response is empty"));
        }
        for meta in &body.data_sets {
            meta.validate()?;
        }
        Ok(body.data_sets)
    }

    /// Ask the remote for the full contents of a freshly allocated tree by
    /// posting a sync request with every leaf empty. The root is the tree's
    /// current root, which may already cover items applied since allocation.
    #[tracing::instrument(skip(self))]
    pub(super) async fn initialization_sync(&self, name: &str) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }

        let (url, request) = {
            let state = self.inner.state.lock();
            let data_set = state
                .data_sets
                .get(name)
                .ok_or_else(|| SyncError::UnknownDataSet(name.to_string()))?;
            let Some(tree) = &data_set.hash_tree else {
                debug!("Data set left view before its initialization sync");
                return Ok(());
            };
            let leaf_count = tree.leaf_count();
            let request = SyncRequest {
                data_set: SyncDataSet {
                    name: name.to_string(),
                    leaf_count,
                    root: tree.root_hash(),
                },
                leaf_data_entries: (0..leaf_count)
                    .map(|leaf_index| LeafDataEntry {
                        leaf_index,
                        element_ids: Vec::new(),
                    })
                    .collect(),
            };
            (data_set.meta.url.clone(), request)
        };

        crate::metrics::record_message("init");
        if let Some(message) = self.post_sync(&url, &request).await? {
            self.process_message(message)?;
        }
        Ok(())
    }

    /// Queue initializations behind any run already in flight.
    pub(super) fn spawn_initializations(&self, pending: PendingInit) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_initializations(pending).await;
        });
    }

    /// One data set at a time; runs from different messages never overlap.
    async fn run_initializations(&self, pending: PendingInit) {
        let _serial = self.inner.init_serial.lock().await;
        let mut tickets = pending.ready;

        let waiting: Vec<InitTicket> = pending
            .needs_meta
            .into_iter()
            .filter(|ticket| self.is_current(ticket))
            .collect();
        if !waiting.is_empty() {
            match self.resolve_metadata(waiting).await {
                Ok(resolved) => tickets.extend(resolved),
                Err(e) => error!(error = %e, "Failed to fetch metadata for newly visible data sets"),
            }
        }

        for ticket in tickets {
            if !self.is_current(&ticket) {
                debug!(data_set = %ticket.name, epoch = ticket.epoch, "Skipping stale initialization");
                continue;
            }
            if let Err(e) = self.initialization_sync(&ticket.name).await {
                error!(data_set = %ticket.name, error = %e, "Initialization sync failed");
            }
        }
    }

    /// Whether the data set is still on the visit that queued `ticket`.
    fn is_current(&self, ticket: &InitTicket) -> bool {
        self.inner.state.lock().view_epoch(&ticket.name) == ticket.epoch
    }

    /// Fetch metadata for active data sets that had none, allocating their trees.
    async fn resolve_metadata(&self, tickets: Vec<InitTicket>) -> Result<Vec<InitTicket>> {
        let url = self.inner.state.lock().visible_data_sets_url.clone();
        let Some(url) = url else {
            let names: Vec<&str> = tickets.iter().map(|ticket| ticket.name.as_str()).collect();
            warn!(data_sets = ?names, "No visible data sets URL; cannot initialize");
            return Ok(Vec::new());
        };

        let metas = self.fetch_data_sets(&url).await?;
        if self.is_stopped() {
            return Ok(Vec::new());
        }

        let mut state = self.inner.state.lock();
        state.record(&metas);
        let names: Vec<String> = tickets.iter().map(|ticket| ticket.name.clone()).collect();
        for name in names.iter().filter(|name| !state.data_sets.contains_key(*name)) {
            warn!(data_set = %name, "Visible data set missing from metadata response");
        }
        let allocated = allocate_empty_trees(&mut state, names)?;
        Ok(tickets
            .into_iter()
            .filter(|ticket| allocated.contains(&ticket.name))
            .collect())
    }

    /// Stop for good: cancel every timer and drop every tree.
    pub(super) fn teardown(&self, state: &mut SyncState) {
        self.inner.stopped.store(true, Ordering::Release);
        let cancelled = state.cancel_all_timers();
        for data_set in state.data_sets.values_mut() {
            data_set.hash_tree = None;
        }
        crate::metrics::set_active_data_sets(0);
        debug!(cancelled, "Coordinator torn down");
    }

    /// Explicit teardown. Later messages are ignored.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        self.teardown(&mut state);
        info!(debug_id = %self.inner.config.debug_id, "Hash tree coordinator shut down");
    }
}

/// Give every listed active data set with metadata an empty tree if it has
/// none. Returns the names that got one.
pub(super) fn allocate_empty_trees(state: &mut SyncState, names: Vec<String>) -> Result<Vec<String>> {
    let mut allocated = Vec::new();
    for name in names {
        if !state.active.contains(&name) {
            continue;
        }
        let Some(data_set) = state.data_sets.get_mut(&name) else {
            warn!(data_set = %name, "Active data set has no metadata");
            continue;
        };
        if data_set.hash_tree.is_none() {
            data_set.hash_tree = Some(HashTree::empty(data_set.meta.leaf_count)?);
            allocated.push(name);
        }
    }
    crate::metrics::set_active_data_sets(state.live_count());
    Ok(allocated)
}
