// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for causal-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `causal_sync_` prefix for all metrics
//! - `_total` suffix for counters
//!
//! # Labels
//! - `node`: node index as `node-N`
//! - `reason`: why a message was dropped

use metrics::{counter, gauge};

use crate::message::NodeId;

/// Set the number of messages currently waiting on dependencies
pub fn set_queued_messages(count: u64) {
    gauge!("causal_sync_queued_messages").set(count as f64);
}

/// Record a dependent message handed to the execution queue
pub fn record_processed() {
    counter!("causal_sync_processed_messages_total").increment(1);
}

/// Record a message dropped before release
pub fn record_dropped(reason: &str) {
    counter!(
        "causal_sync_dropped_messages_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record callbacks released by a version signal
pub fn record_released(node: NodeId, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "causal_sync_released_callbacks_total",
        "node" => node.to_string()
    )
    .increment(count as u64);
}

/// Set active subscriptions on a node
pub fn set_subscriptions(node: NodeId, count: usize) {
    gauge!(
        "causal_sync_subscriptions",
        "node" => node.to_string()
    )
    .set(count as f64);
}

/// Record stale subscriptions removed by cleanup
pub fn record_cleanup(node: NodeId, removed: usize) {
    counter!(
        "causal_sync_stale_subscriptions_total",
        "node" => node.to_string()
    )
    .increment(removed as u64);
}

/// Record dependencies forced forward by recovery
pub fn record_recovery(increments: usize) {
    counter!("causal_sync_recoveries_total").increment(1);
    counter!("causal_sync_recovered_dependencies_total").increment(increments as u64);
}

/// Record an unexpected connection loss
pub fn record_connection_lost(node: NodeId) {
    counter!(
        "causal_sync_connection_lost_total",
        "node" => node.to_string()
    )
    .increment(1);
}

/// Record a completed reconnect
pub fn record_reconnect() {
    counter!("causal_sync_reconnects_total").increment(1);
}

/// Set connection health (1 = connected, 0 = disconnected)
pub fn set_connected(connected: bool) {
    gauge!("causal_sync_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record error by kind
pub fn record_error(kind: &str) {
    counter!(
        "causal_sync_errors_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}
