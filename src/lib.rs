//! # Hash Tree Sync
//!
//! Incremental reconciliation of a partitioned, versioned collection against a
//! remote authority, without transferring the whole collection on every update.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Remote Authority                        │
//! │  • Heartbeats { dataSets } / full updates { elements }      │
//! │  • GET <url>/hashtree, POST <url>/sync                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                      (Transport trait)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                HashTreeSync (coordinator)                   │
//! │  • Per data set metadata, visibility tracking               │
//! │  • Jittered verification timers                             │
//! │  • Narrow repair requests for divergent leaves only         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (put / remove / update batches)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  HashTree (per data set)                    │
//! │  • id mod leafCount placement                               │
//! │  • xxh3-128 leaf hashes folded into a root                  │
//! │  • Resize and leaf-level diff                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applied changes reach the host through a single callback
//! ([`ReconcileEvent`]); only objects that actually changed local state are
//! reported.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hashtree_sync::{Bootstrap, HashTreeMessage, HashTreeSync, ReconcileEvent, SyncConfig, Transport};
//!
//! # async fn run(transport: Arc<dyn Transport>, message: HashTreeMessage) -> hashtree_sync::Result<()> {
//! let sync = HashTreeSync::new(
//!     SyncConfig::default(),
//!     Bootstrap::default(),
//!     transport,
//!     Arc::new(|event: ReconcileEvent| println!("{event:?}")),
//! )?;
//!
//! sync.initialize_from_message(&message).await?;
//! let outcome = sync.handle_message(message)?;
//! println!("applied {} objects", outcome.applied.len());
//!
//! sync.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`hash_tree`]: The [`HashTree`] and its hashing scheme
//! - [`coordinator`]: The [`HashTreeSync`] orchestrating data sets and timers
//! - [`message`]: Wire types
//! - [`discovery`]: Tagged object discovery in state documents
//! - [`transport`]: Request seam to the remote authority
//! - [`backoff`]: Jittered delays and timer handles

pub mod config;
pub mod error;
pub mod item;
pub mod hash_tree;
pub mod message;
pub mod discovery;
pub mod transport;
pub mod backoff;
pub mod coordinator;
pub mod metrics;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use item::{Item, ObjectType, Operation};
pub use hash_tree::{combine, hash_bytes, HashTree, LeafHash, EMPTY_HASH};
pub use message::{
    Backoff, DataSetMeta, DataSetsResponse, HashTreeMessage, HashesResponse, HtMeta, LeafDataEntry,
    StateUpdate, SyncDataSet, SyncRequest, TaggedObject,
};
pub use transport::{Method, Response, Transport};
pub use coordinator::{Bootstrap, HashTreeSync, MessageOutcome, ReconcileEvent, SyncRound, UpdateCallback};
pub use metrics::LatencyTimer;
