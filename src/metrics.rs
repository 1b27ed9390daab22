// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for hash tree reconciliation.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `hashtree_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `data_set`: data set name
//! - `kind`: heartbeat, full, state_update, init
//! - `endpoint`: hashtree, sync, data_sets
//! - `status`: HTTP-style status or `error`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an inbound message
pub fn record_message(kind: &str) {
    counter!(
        "hashtree_sync_messages_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record objects that changed local state
pub fn record_items_applied(data_set: &str, count: usize) {
    counter!(
        "hashtree_sync_items_applied_total",
        "data_set" => data_set.to_string()
    )
    .increment(count as u64);
}

/// Record synthesized removals for a data set that dropped out of view
pub fn record_tombstones(data_set: &str, count: usize) {
    counter!(
        "hashtree_sync_tombstones_total",
        "data_set" => data_set.to_string()
    )
    .increment(count as u64);
}

/// Record an outbound request and its outcome
pub fn record_request(endpoint: &str, status: &str) {
    counter!(
        "hashtree_sync_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record request latency
pub fn record_request_latency(endpoint: &str, duration: Duration) {
    histogram!(
        "hashtree_sync_request_seconds",
        "endpoint" => endpoint.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a verification round where local and remote roots disagreed
pub fn record_root_mismatch(data_set: &str) {
    counter!(
        "hashtree_sync_root_mismatches_total",
        "data_set" => data_set.to_string()
    )
    .increment(1);
}

/// Record leaves sent in a sync request
pub fn record_divergent_leaves(data_set: &str, count: usize) {
    histogram!(
        "hashtree_sync_divergent_leaves",
        "data_set" => data_set.to_string()
    )
    .record(count as f64);
}

pub fn record_timer_armed(data_set: &str) {
    counter!(
        "hashtree_sync_timers_armed_total",
        "data_set" => data_set.to_string()
    )
    .increment(1);
}

pub fn record_timer_cancelled(data_set: &str) {
    counter!(
        "hashtree_sync_timers_cancelled_total",
        "data_set" => data_set.to_string()
    )
    .increment(1);
}

/// Set number of data sets with a local tree
pub fn set_active_data_sets(count: usize) {
    gauge!("hashtree_sync_active_data_sets").set(count as f64);
}

/// Set item count held in a data set's tree
pub fn set_tree_items(data_set: &str, count: usize) {
    gauge!(
        "hashtree_sync_tree_items",
        "data_set" => data_set.to_string()
    )
    .set(count as f64);
}

/// Record session end (`reason`: collapsed, roster_dropped)
pub fn record_end_of_session(reason: &str) {
    counter!(
        "hashtree_sync_end_of_session_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// A timing guard that records request latency on drop
pub struct LatencyTimer {
    endpoint: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_request_latency(self.endpoint, self.start.elapsed());
    }
}

/// Convenience macro for timing requests
#[macro_export]
macro_rules! time_request {
    ($endpoint:expr) => {
        $crate::metrics::LatencyTimer::new($endpoint)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_message_counters() {
        record_message("heartbeat");
        record_message("full");
        record_items_applied("main", 3);
        record_tombstones("atd", 2);
    }

    #[test]
    fn test_request_metrics() {
        record_request("hashtree", "200");
        record_request("sync", "error");
        record_request_latency("sync", Duration::from_millis(12));
        record_divergent_leaves("main", 4);
        record_root_mismatch("main");
    }

    #[test]
    fn test_gauges() {
        set_active_data_sets(3);
        set_tree_items("main", 120);
    }

    #[test]
    fn test_timer_and_session_counters() {
        record_timer_armed("main");
        record_timer_cancelled("main");
        record_end_of_session("collapsed");
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = time_request!("hashtree");
            std::thread::sleep(Duration::from_micros(10));
        }
    }
}
