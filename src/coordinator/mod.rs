// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation coordinator.
//!
//! The [`HashTreeSync`] owns one [`HashTree`] per mirrored data set and keeps
//! it converged with the remote authority:
//! - applies full updates and partial state deltas
//! - follows the self object's visibility list (tombstones on leave, init sync on join)
//! - re-verifies roots on a jittered timer and repairs only divergent leaves
//!
//! # Data set lifecycle
//!
//! ```text
//! referenced ──► metadata only ──(visible)──► active (tree + timer)
//!                      ▲                           │
//!                      └──────(not visible)────────┘  tombstones emitted
//!
//! end of session / shutdown: every timer cancelled, every tree dropped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hashtree_sync::{Bootstrap, HashTreeSync, ReconcileEvent, SyncConfig, Transport};
//!
//! # async fn run(transport: Arc<dyn Transport>, snapshot: serde_json::Value) -> hashtree_sync::Result<()> {
//! let sync = HashTreeSync::new(
//!     SyncConfig::default(),
//!     Bootstrap { active_data_sets: vec!["main".into(), "self".into()], ..Default::default() },
//!     transport,
//!     Arc::new(|event: ReconcileEvent| println!("{event:?}")),
//! )?;
//! sync.initialize_from_snapshot(&snapshot).await?;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod messages;
mod sync_api;
mod types;

pub use types::{Bootstrap, MessageOutcome, ReconcileEvent, SyncRound, UpdateCallback};

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::backoff::TimerHandle;
use crate::config::SyncConfig;
use crate::hash_tree::{HashTree, LeafHash};
use crate::item::Item;
use crate::message::DataSetMeta;
use crate::transport::Transport;

/// A named partition tracked by the coordinator.
#[derive(Debug)]
pub(super) struct DataSet {
    pub(super) meta: DataSetMeta,
    /// Present only while the data set is mirrored
    pub(super) hash_tree: Option<HashTree>,
    pub(super) timer: Option<TimerHandle>,
    pub(super) timer_generation: u64,
}

impl DataSet {
    fn new(meta: DataSetMeta) -> Self {
        Self {
            meta,
            hash_tree: None,
            timer: None,
            timer_generation: 0,
        }
    }

    pub(super) fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.cancel();
                crate::metrics::record_timer_cancelled(&self.meta.name);
                true
            }
            None => false,
        }
    }

    /// Drop the tree and any pending timer, returning the items the tree held.
    pub(super) fn deactivate(&mut self) -> Vec<Item> {
        self.cancel_timer();
        self.hash_tree
            .take()
            .map(|tree| tree.all_items())
            .unwrap_or_default()
    }
}

/// Everything guarded by the coordinator lock.
#[derive(Debug, Default)]
pub(super) struct SyncState {
    pub(super) data_sets: HashMap<String, DataSet>,
    pub(super) active: BTreeSet<String>,
    pub(super) visible_data_sets_url: Option<String>,
    /// Bumped each time a data set enters or leaves view
    pub(super) view_epochs: HashMap<String, u64>,
}

impl SyncState {
    /// Record reported metadata. A known data set is only updated when the
    /// reported version is strictly newer.
    ///
    /// Returns the version each data set had before this call.
    pub(super) fn record(&mut self, metas: &[DataSetMeta]) -> HashMap<String, Option<u64>> {
        let mut previous = HashMap::new();
        for meta in metas {
            let before = match self.data_sets.get_mut(&meta.name) {
                Some(data_set) => {
                    let before = data_set.meta.version;
                    if meta.version > before {
                        data_set.meta = meta.clone();
                    }
                    Some(before)
                }
                None => {
                    self.data_sets
                        .insert(meta.name.clone(), DataSet::new(meta.clone()));
                    None
                }
            };
            previous.entry(meta.name.clone()).or_insert(before);
        }
        previous
    }

    /// Live tree for `name`, warning when there is none.
    pub(super) fn live_tree(&mut self, name: &str) -> Option<&mut HashTree> {
        match self.data_sets.get_mut(name) {
            None => {
                warn!(data_set = %name, "Skipping update for unknown data set");
                None
            }
            Some(data_set) => {
                if data_set.hash_tree.is_none() {
                    warn!(data_set = %name, "Skipping update for data set without a live tree");
                }
                data_set.hash_tree.as_mut()
            }
        }
    }

    /// Mark `name` as having entered or left view, invalidating queued
    /// initializations from earlier visits.
    pub(super) fn bump_view_epoch(&mut self, name: &str) -> u64 {
        let epoch = self.view_epochs.entry(name.to_string()).or_default();
        *epoch += 1;
        *epoch
    }

    pub(super) fn view_epoch(&self, name: &str) -> u64 {
        self.view_epochs.get(name).copied().unwrap_or_default()
    }

    pub(super) fn live_count(&self) -> usize {
        self.data_sets
            .values()
            .filter(|data_set| data_set.hash_tree.is_some())
            .count()
    }

    pub(super) fn cancel_all_timers(&mut self) -> usize {
        self.data_sets
            .values_mut()
            .map(DataSet::cancel_timer)
            .filter(|&cancelled| cancelled)
            .count()
    }
}

pub(super) struct Inner {
    pub(super) config: SyncConfig,
    pub(super) state: Mutex<SyncState>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) on_update: UpdateCallback,
    pub(super) stopped: AtomicBool,
    /// Held across a whole initialization run so runs never overlap
    pub(super) init_serial: tokio::sync::Mutex<()>,
}

/// Incremental reconciliation coordinator.
///
/// Cheap to clone; clones share state. Every mutation goes through one lock
/// that is never held across a request, so updates apply in arrival order.
///
/// Methods that can arm timers or queue initializations must be called from
/// within a tokio runtime.
#[derive(Clone)]
pub struct HashTreeSync {
    pub(super) inner: Arc<Inner>,
}

impl fmt::Debug for HashTreeSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTreeSync")
            .field("debug_id", &self.inner.config.debug_id)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl HashTreeSync {
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Current local root of a mirrored data set.
    #[must_use]
    pub fn root_hash(&self, name: &str) -> Option<LeafHash> {
        let state = self.inner.state.lock();
        state
            .data_sets
            .get(name)?
            .hash_tree
            .as_ref()
            .map(HashTree::root_hash)
    }

    /// Full node hash list of a mirrored data set.
    #[must_use]
    pub fn hashes(&self, name: &str) -> Option<Vec<LeafHash>> {
        let state = self.inner.state.lock();
        state
            .data_sets
            .get(name)?
            .hash_tree
            .as_ref()
            .map(HashTree::hashes)
    }

    #[must_use]
    pub fn active_data_sets(&self) -> Vec<String> {
        self.inner.state.lock().active.iter().cloned().collect()
    }

    /// Last recorded metadata for a data set.
    #[must_use]
    pub fn data_set(&self, name: &str) -> Option<DataSetMeta> {
        let state = self.inner.state.lock();
        state.data_sets.get(name).map(|data_set| data_set.meta.clone())
    }

    #[must_use]
    pub fn item_count(&self, name: &str) -> Option<usize> {
        let state = self.inner.state.lock();
        state
            .data_sets
            .get(name)?
            .hash_tree
            .as_ref()
            .map(HashTree::total_item_count)
    }

    #[must_use]
    pub fn has_pending_timer(&self, name: &str) -> bool {
        let state = self.inner.state.lock();
        state
            .data_sets
            .get(name)
            .and_then(|data_set| data_set.timer.as_ref())
            .is_some_and(|timer| !timer.is_finished())
    }

    pub(super) fn emit(&self, event: ReconcileEvent) {
        (self.inner.on_update)(event);
    }
}
