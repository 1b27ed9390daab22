// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the reconciliation coordinator.

use std::sync::Arc;

use serde_json::Value;

use crate::message::{DataSetMeta, TaggedObject};

/// Notification delivered to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileEvent {
    /// Objects that changed local state, in application order. Never empty.
    ///
    /// Removals carry no payload; tombstones for a data set that dropped out
    /// of view are reported the same way.
    ObjectsUpdated(Vec<TaggedObject>),
    /// The mirrored state is no longer valid. All timers have been cancelled.
    EndOfSession,
}

impl ReconcileEvent {
    pub fn objects(&self) -> &[TaggedObject] {
        match self {
            Self::ObjectsUpdated(objects) => objects,
            Self::EndOfSession => &[],
        }
    }
}

/// Host callback. Invoked without any coordinator lock held.
pub type UpdateCallback = Arc<dyn Fn(ReconcileEvent) + Send + Sync>;

/// Initial state handed to [`super::HashTreeSync::new`].
#[derive(Debug, Clone, Default)]
pub struct Bootstrap {
    /// Snapshot document scanned for tagged objects
    pub state: Value,
    /// Known data set metadata
    pub data_sets: Vec<DataSetMeta>,
    /// Data sets mirrored from the start
    pub active_data_sets: Vec<String>,
}

/// What a full update or heartbeat changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageOutcome {
    /// Objects applied, each reported once even when tagged with several data sets
    pub applied: Vec<TaggedObject>,
    /// Newly visible data sets queued for an initialization sync
    pub queued_initializations: usize,
    pub end_of_session: bool,
}

/// Outcome of one verification round.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRound {
    /// The data set is not mirrored
    NoTree,
    /// Local root matches the last reported remote root
    InSync,
    /// The remote leaf count changed; the next heartbeat drives the retry
    LeafCountConflict,
    /// Roots differ but every leaf hash matches
    NoDivergentLeaves,
    /// The data set was torn down while the round was in flight
    Abandoned,
    /// A repair request was sent for `leaves`
    Repaired {
        leaves: Vec<usize>,
        /// Processed reply, if the remote answered synchronously
        response: Option<MessageOutcome>,
    },
}

/// One queued initialization, valid only while the data set's view epoch
/// is unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct InitTicket {
    pub(super) name: String,
    pub(super) epoch: u64,
}

impl InitTicket {
    pub(super) fn new(name: impl Into<String>, epoch: u64) -> Self {
        Self {
            name: name.into(),
            epoch,
        }
    }
}

/// Data sets waiting for their first sync.
#[derive(Debug, Default)]
pub(super) struct PendingInit {
    /// Metadata known, empty tree already allocated
    pub(super) ready: Vec<InitTicket>,
    /// Metadata must be fetched first
    pub(super) needs_meta: Vec<InitTicket>,
}

impl PendingInit {
    pub(super) fn len(&self) -> usize {
        self.ready.len() + self.needs_meta.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ObjectType};

    #[test]
    fn test_event_objects() {
        let obj = TaggedObject::removal(Item::new(ObjectType::Participant, 1, 1), "main");
        assert_eq!(ReconcileEvent::ObjectsUpdated(vec![obj.clone()]).objects(), &[obj]);
        assert!(ReconcileEvent::EndOfSession.objects().is_empty());
    }

    #[test]
    fn test_pending_init_len() {
        let mut pending = PendingInit::default();
        assert!(pending.is_empty());
        pending.ready.push(InitTicket::new("main", 1));
        pending.needs_meta.push(InitTicket::new("atd", 2));
        assert_eq!(pending.len(), 2);
    }
}
