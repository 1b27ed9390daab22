// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Inbound message handling: heartbeats, full updates and state deltas.
//!
//! A full update is processed in order:
//! 1. record data set metadata
//! 2. detect the end-of-session collapse
//! 3. apply self objects and follow their visibility list
//! 4. apply everything else as mixed update/remove batches per data set
//! 5. re-arm verification timers
//!
//! The host callback fires once per message, after the lock is released.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::discovery::{discover, visible_data_sets};
use crate::error::Result;
use crate::hash_tree::{HashTree, EMPTY_HASH};
use crate::item::Operation;
use crate::message::{DataSetMeta, HashTreeMessage, StateUpdate, TaggedObject};

use super::lifecycle::allocate_empty_trees;
use super::types::{InitTicket, PendingInit};
use super::{HashTreeSync, MessageOutcome, ReconcileEvent, SyncState};

impl HashTreeSync {
    /// Apply a heartbeat or full update from the remote authority.
    ///
    /// Heartbeats only refresh metadata and timers. Applied objects are
    /// delivered to the callback and returned; newly visible data sets are
    /// initialized in the background.
    #[tracing::instrument(
        skip(self, message),
        fields(debug_id = %self.inner.config.debug_id, heartbeat = message.is_heartbeat())
    )]
    pub fn handle_message(&self, message: HashTreeMessage) -> Result<MessageOutcome> {
        crate::metrics::record_message(if message.is_heartbeat() { "heartbeat" } else { "full" });
        self.process_message(message)
    }

    pub(super) fn process_message(&self, message: HashTreeMessage) -> Result<MessageOutcome> {
        if self.is_stopped() {
            warn!("Ignoring message after end of session");
            return Ok(MessageOutcome::default());
        }
        for meta in &message.data_sets {
            meta.validate()?;
        }

        let mut pending = PendingInit::default();
        let mut outcome = {
            let mut state = self.inner.state.lock();
            if let Some(url) = &message.visible_data_sets_url {
                state.visible_data_sets_url = Some(url.clone());
            }
            let previous = state.record(&message.data_sets);
            adopt_untracked(&mut state, &mut pending)?;

            match &message.locus_state_elements {
                None => {
                    for meta in &message.data_sets {
                        self.evaluate(&mut state, &meta.name)?;
                    }
                    MessageOutcome::default()
                }
                Some(elements) => self.apply_full_update(
                    &mut state,
                    &message.data_sets,
                    &previous,
                    elements,
                    &mut pending,
                )?,
            }
        };

        if outcome.end_of_session {
            self.emit(ReconcileEvent::EndOfSession);
            return Ok(outcome);
        }
        if !outcome.applied.is_empty() {
            self.emit(ReconcileEvent::ObjectsUpdated(outcome.applied.clone()));
        }
        if !pending.is_empty() {
            outcome.queued_initializations = pending.len();
            self.spawn_initializations(pending);
        }
        Ok(outcome)
    }

    fn apply_full_update(
        &self,
        state: &mut SyncState,
        metas: &[DataSetMeta],
        previous: &HashMap<String, Option<u64>>,
        elements: &[TaggedObject],
        pending: &mut PendingInit,
    ) -> Result<MessageOutcome> {
        if let Some(meta) = self.session_collapse(metas, previous) {
            info!(data_set = %meta.name, version = meta.version, "End of session detected");
            crate::metrics::record_end_of_session("collapsed");
            self.teardown(state);
            return Ok(MessageOutcome {
                end_of_session: true,
                ..Default::default()
            });
        }

        let (self_updates, rest): (Vec<&TaggedObject>, Vec<&TaggedObject>) = elements
            .iter()
            .partition(|object| object.is_self() && !object.is_removal());

        let mut applied = Vec::new();
        for object in self_updates {
            let mut put = false;
            for name in &object.meta.data_set_names {
                if let Some(tree) = state.live_tree(name) {
                    put |= tree.put_item(object.item());
                }
            }
            if !put {
                continue;
            }
            applied.push(object.clone());
            if let Some(visible) = object.data.as_ref().and_then(visible_data_sets) {
                apply_visibility(state, visible, &mut applied, pending)?;
            }
        }

        let hits = apply_batches(state, &rest);
        if rest.iter().zip(&hits).any(|(object, &hit)| hit && object.is_self()) {
            info!("Self object removed; session ended for this participant");
            crate::metrics::record_end_of_session("roster_dropped");
            self.teardown(state);
            return Ok(MessageOutcome {
                end_of_session: true,
                ..Default::default()
            });
        }
        applied.extend(
            rest.into_iter()
                .zip(hits)
                .filter(|(_, hit)| *hit)
                .map(|(object, _)| object.clone()),
        );

        for meta in metas {
            self.evaluate(state, &meta.name)?;
        }

        debug!(applied = applied.len(), queued = pending.len(), "Full update applied");
        Ok(MessageOutcome {
            applied,
            ..Default::default()
        })
    }

    /// The end-of-session data set collapsing to one empty leaf at a newer version.
    fn session_collapse<'a>(
        &self,
        metas: &'a [DataSetMeta],
        previous: &HashMap<String, Option<u64>>,
    ) -> Option<&'a DataSetMeta> {
        metas.iter().find(|meta| {
            meta.name == self.inner.config.end_of_session_data_set
                && meta.leaf_count == 1
                && meta.root == EMPTY_HASH
                && matches!(previous.get(&meta.name), Some(Some(before)) if meta.version > *before)
        })
    }

    /// Apply a partial state delta. Only puts; returns how many objects applied.
    #[tracing::instrument(skip(self, update), fields(debug_id = %self.inner.config.debug_id))]
    pub fn handle_state_update(&self, update: &StateUpdate) -> Result<usize> {
        if self.is_stopped() {
            warn!("Ignoring state update after end of session");
            return Ok(0);
        }
        for meta in &update.data_sets {
            meta.validate()?;
        }
        crate::metrics::record_message("state_update");

        let objects = discover(&update.state);
        let applied: Vec<TaggedObject> = {
            let mut state = self.inner.state.lock();
            state.record(&update.data_sets);

            let mut applied = Vec::new();
            for object in objects {
                let mut put = false;
                for name in &object.meta.data_set_names {
                    if let Some(tree) = state.live_tree(name) {
                        if tree.put_item(object.item()) {
                            put = true;
                            crate::metrics::record_items_applied(name, 1);
                        }
                    }
                }
                if put {
                    applied.push(object);
                }
            }
            applied
        };

        let count = applied.len();
        if count > 0 {
            self.emit(ReconcileEvent::ObjectsUpdated(applied));
        }
        Ok(count)
    }
}

/// Apply non-self objects as one mixed batch per data set.
///
/// Returns, per object, whether it applied in at least one data set.
fn apply_batches(state: &mut SyncState, objects: &[&TaggedObject]) -> Vec<bool> {
    let mut batches: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, object) in objects.iter().enumerate() {
        for name in &object.meta.data_set_names {
            batches.entry(name.as_str()).or_default().push(index);
        }
    }

    let mut hits = vec![false; objects.len()];
    for (name, indices) in batches {
        let Some(tree) = state.live_tree(name) else {
            continue;
        };
        let operations: Vec<Operation> = indices
            .iter()
            .map(|&index| {
                let object = objects[index];
                if object.is_removal() {
                    Operation::Remove(*object.item())
                } else {
                    Operation::Update(*object.item())
                }
            })
            .collect();

        let mut count = 0;
        for (&index, applied) in indices.iter().zip(tree.update_items(&operations)) {
            if applied {
                hits[index] = true;
                count += 1;
            }
        }
        crate::metrics::record_items_applied(name, count);
        crate::metrics::set_tree_items(name, tree.total_item_count());
    }
    hits
}

/// Give active data sets that have metadata but no tree an empty one and
/// queue their initialization.
///
/// Covers a visible data set whose metadata fetch failed earlier and is
/// reported by a later message.
fn adopt_untracked(state: &mut SyncState, pending: &mut PendingInit) -> Result<()> {
    let untracked: Vec<String> = state
        .active
        .iter()
        .filter(|name| {
            state
                .data_sets
                .get(*name)
                .is_some_and(|data_set| data_set.hash_tree.is_none())
        })
        .cloned()
        .collect();
    if untracked.is_empty() {
        return Ok(());
    }

    for name in allocate_empty_trees(state, untracked)? {
        info!(data_set = %name, "Metadata arrived for visible data set; queueing initialization");
        let epoch = state.view_epoch(&name);
        pending.ready.push(InitTicket::new(name, epoch));
    }
    Ok(())
}

/// Diff a self object's visibility list against the active set.
///
/// Data sets that left view are torn down with a tombstone per held item.
/// Data sets that joined get an empty tree when their metadata is known, and
/// are queued for initialization either way.
fn apply_visibility(
    state: &mut SyncState,
    visible: Vec<String>,
    applied: &mut Vec<TaggedObject>,
    pending: &mut PendingInit,
) -> Result<()> {
    let visible: BTreeSet<String> = visible.into_iter().collect();
    let removed: Vec<String> = state.active.difference(&visible).cloned().collect();
    let added: Vec<String> = visible.difference(&state.active).cloned().collect();

    for name in removed {
        state.active.remove(&name);
        state.bump_view_epoch(&name);
        let Some(data_set) = state.data_sets.get_mut(&name) else {
            continue;
        };
        let items = data_set.deactivate();
        info!(data_set = %name, tombstones = items.len(), "Data set left view");
        crate::metrics::record_tombstones(&name, items.len());
        crate::metrics::set_tree_items(&name, 0);
        applied.extend(items.into_iter().map(|item| TaggedObject::removal(item, &name)));
    }

    for name in added {
        state.active.insert(name.clone());
        let epoch = state.bump_view_epoch(&name);
        match state.data_sets.get_mut(&name) {
            Some(data_set) => {
                if data_set.hash_tree.is_none() {
                    data_set.hash_tree = Some(HashTree::empty(data_set.meta.leaf_count)?);
                }
                info!(data_set = %name, "Data set entered view");
                pending.ready.push(InitTicket::new(name, epoch));
            }
            None => {
                info!(data_set = %name, "Data set entered view; metadata unknown");
                pending.needs_meta.push(InitTicket::new(name, epoch));
            }
        }
    }

    crate::metrics::set_active_data_sets(state.live_count());
    Ok(())
}
