// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic hashtree-sync usage example.
//!
//! Demonstrates:
//! 1. Bootstrapping a coordinator from a (stale) snapshot
//! 2. A heartbeat revealing a root mismatch
//! 3. The verification timer repairing only the divergent leaves
//! 4. Displaying metrics
//! 5. Clean shutdown
//!
//! The remote authority is simulated in memory, so nothing needs to be running.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use parking_lot::Mutex;
use serde_json::{json, Value};

use hashtree_sync::{
    Bootstrap, DataSetMeta, HashTree, HashTreeSync, Item, Method, ObjectType, ReconcileEvent,
    Response, Result, SyncConfig, SyncError, SyncRequest, Transport,
};

const LEAF_COUNT: usize = 4;

/// In-memory remote authority holding the "main" data set.
struct Authority {
    tree: Mutex<HashTree>,
    names: BTreeMap<u64, String>,
    version: u64,
}

impl Authority {
    fn new(participants: &[(u64, u64, &str)]) -> Self {
        let items = participants
            .iter()
            .map(|&(id, version, _)| Item::new(ObjectType::Participant, id, version));
        Self {
            tree: Mutex::new(HashTree::new(items, LEAF_COUNT).expect("valid leaf count")),
            names: participants
                .iter()
                .map(|&(id, _, name)| (id, name.to_string()))
                .collect(),
            version: 7,
        }
    }

    fn meta(&self) -> Value {
        json!({
            "name": "main",
            "url": "https://authority/main",
            "leafCount": LEAF_COUNT,
            "version": self.version,
            "root": self.tree.lock().root_hash().to_string(),
            "idleMs": 200,
            "backoff": {"maxMs": 100, "exponent": 2.0}
        })
    }

    /// Reply to a sync request with whatever the caller is missing or holds stale.
    fn repair(&self, request: &SyncRequest) -> Value {
        let tree = self.tree.lock();
        let mut elements = Vec::new();
        for entry in &request.leaf_data_entries {
            let remote = tree.leaf_data(entry.leaf_index);
            for item in &remote {
                if !entry.element_ids.contains(item) {
                    elements.push(json!({
                        "htMeta": {"elementId": item, "dataSetNames": ["main"]},
                        "data": {"name": self.names.get(&item.id)}
                    }));
                }
            }
            for item in &entry.element_ids {
                if !remote.iter().any(|r| r.key() == item.key()) {
                    elements.push(json!({
                        "htMeta": {"elementId": item, "dataSetNames": ["main"]},
                        "data": null
                    }));
                }
            }
        }
        drop(tree);
        json!({"dataSets": [self.meta()], "locusStateElements": elements})
    }
}

#[async_trait]
impl Transport for Authority {
    async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Result<Response> {
        println!("   └─ {method} {uri}");
        match (method, uri) {
            (Method::Get, "https://authority/main/hashtree") => Ok(Response::ok(json!({
                "hashes": self.tree.lock().hashes(),
                "dataSet": self.meta()
            }))),
            (Method::Post, "https://authority/main/sync") => {
                let request: SyncRequest = serde_json::from_value(body.unwrap_or_default())?;
                Ok(Response::ok(self.repair(&request)))
            }
            _ => Err(SyncError::Transport {
                status: Some(404),
                message: format!("no route for {uri}"),
            }),
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures all metrics for export)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           hashtree-sync: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Bootstrap from a snapshot that is already out of date
    // ─────────────────────────────────────────────────────────────────────────
    let authority = Arc::new(Authority::new(&[
        (1, 1, "alice"),
        (2, 3, "bob"),
        (5, 1, "carol"),
        (6, 2, "dave"),
    ]));

    let snapshot = json!({
        "participants": [
            {"htMeta": {"elementId": {"type": "participant", "id": 1, "version": 1}, "dataSetNames": ["main"]}, "name": "alice"},
            {"htMeta": {"elementId": {"type": "participant", "id": 2, "version": 1}, "dataSetNames": ["main"]}, "name": "bob"},
            {"htMeta": {"elementId": {"type": "participant", "id": 3, "version": 1}, "dataSetNames": ["main"]}, "name": "eve"}
        ]
    });

    let sync = HashTreeSync::new(
        SyncConfig {
            debug_id: "demo".into(),
            ..Default::default()
        },
        Bootstrap {
            state: snapshot,
            data_sets: vec![DataSetMeta::new("main", "https://authority/main", LEAF_COUNT)],
            active_data_sets: vec!["main".into()],
        },
        authority.clone(),
        Arc::new(|event: ReconcileEvent| match event {
            ReconcileEvent::ObjectsUpdated(objects) => {
                for object in objects {
                    let action = if object.is_removal() { "removed" } else { "updated" };
                    println!("   📣 {} {}", action, object.item());
                }
            }
            ReconcileEvent::EndOfSession => println!("   📣 session ended"),
        }),
    )?;

    println!("📦 Bootstrapped with {:?} items", sync.item_count("main"));
    println!("   └─ Local root:  {}", sync.root_hash("main").unwrap_or_default());
    println!("   └─ Remote root: {}", authority.tree.lock().root_hash());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Heartbeat: remote reports its root, local arms a verification timer
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n💓 Heartbeat received");
    let heartbeat = serde_json::from_value(json!({"dataSets": [authority.meta()]}))?;
    sync.handle_message(heartbeat)?;
    println!("   └─ Timer pending: {}", sync.has_pending_timer("main"));

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Timer fires: hash query, then a repair for divergent leaves only
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔧 Waiting for verification round...");
    tokio::time::sleep(Duration::from_millis(400)).await;

    let local = sync.root_hash("main").unwrap_or_default();
    let remote = authority.tree.lock().root_hash();
    println!("\n🌳 After repair");
    println!("   └─ Items: {:?}", sync.item_count("main"));
    println!("   └─ Local root:  {local}");
    println!("   └─ Remote root: {remote}");
    if local == remote {
        println!("   └─ ✅ Roots match! Data is in sync.");
    } else {
        println!("   └─ ⚠️  Roots differ");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    sync.shutdown();
    println!("   ✅ Stopped: {}", sync.is_stopped());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();
    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{v}"),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.4}", samples.len(), sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }

    lines.sort();
    for line in lines {
        println!("   └─ {line}");
    }
}
