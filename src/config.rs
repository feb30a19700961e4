// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the message synchronizer.
//!
//! # Example
//!
//! ```
//! use causal_sync::SynchronizerConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SynchronizerConfig::default();
//! assert_eq!(config.prefetch, 1000);
//! assert_eq!(config.cleanup_interval, 100);
//!
//! // Two shards, recovery enabled
//! let config = SynchronizerConfig {
//!     nodes: vec!["redis://10.0.0.1:6379".into(), "redis://10.0.0.2:6379".into()],
//!     recovery: true,
//!     prefetch: 50,
//!     ..Default::default()
//! };
//! assert_eq!(config.reconnect_interval().as_secs(), 2);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::message::NodeId;

/// Delay between reconnect attempts after a lost connection.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);
/// Run subscription cleanup every this many processed messages.
pub const CLEANUP_INTERVAL: u64 = 100;
/// An idle subscription is stale after this many processed messages.
pub const QUEUE_MAX_AGE: u64 = 100;
/// Lifetime of the guard key set by a recovery increment.
pub const RECOVERY_GUARD_TTL: Duration = Duration::from_secs(10);

/// Configuration for the synchronizer.
///
/// Loading this from files or the environment is up to the host; every field
/// has a default so a partial document deserializes.
#[derive(Debug, Clone, Deserialize)]
pub struct SynchronizerConfig {
    /// Redis URLs, one per node. A key's node is chosen with [`NodeId::for_key`].
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,

    /// Bootstrap mode: skip asking the transport to redeliver unacked messages on connect.
    #[serde(default)]
    pub bootstrap: bool,

    /// Transport prefetch limit. Queued messages reaching this means the pipeline is saturated.
    /// `0` is an unbounded prefetch, which never saturates.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Force stalled dependencies forward when the pipeline is saturated.
    #[serde(default)]
    pub recovery: bool,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    #[serde(default = "default_queue_max_age")]
    pub queue_max_age: u64,

    #[serde(default = "default_recovery_guard_ttl_secs")]
    pub recovery_guard_ttl_secs: u64,

    /// Attempts per node connection before `connect()` gives up.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
}

fn default_nodes() -> Vec<String> { vec!["redis://127.0.0.1:6379".to_string()] }
fn default_prefetch() -> usize { 1000 }
fn default_reconnect_interval_ms() -> u64 { RECONNECT_INTERVAL.as_millis() as u64 }
fn default_cleanup_interval() -> u64 { CLEANUP_INTERVAL }
fn default_queue_max_age() -> u64 { QUEUE_MAX_AGE }
fn default_recovery_guard_ttl_secs() -> u64 { RECOVERY_GUARD_TTL.as_secs() }
fn default_connect_retries() -> usize { 5 }

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            bootstrap: false,
            prefetch: default_prefetch(),
            recovery: false,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            cleanup_interval: default_cleanup_interval(),
            queue_max_age: default_queue_max_age(),
            recovery_guard_ttl_secs: default_recovery_guard_ttl_secs(),
            connect_retries: default_connect_retries(),
        }
    }
}

impl SynchronizerConfig {
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    #[must_use]
    pub fn recovery_guard_ttl(&self) -> Duration {
        Duration::from_secs(self.recovery_guard_ttl_secs.max(1))
    }

    /// Cleanup cadence, never zero.
    #[must_use]
    pub fn effective_cleanup_interval(&self) -> u64 {
        self.cleanup_interval.max(1)
    }

    /// Queued messages at which the pipeline counts as saturated.
    #[must_use]
    pub fn saturation_threshold(&self) -> Option<u64> {
        (self.prefetch > 0).then_some(self.prefetch as u64)
    }

    /// Node owning `key` in this configuration.
    #[must_use]
    pub fn node_for_key(&self, key: &str) -> NodeId {
        NodeId::for_key(key, self.nodes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = SynchronizerConfig::default();
        assert_eq!(config.reconnect_interval(), RECONNECT_INTERVAL);
        assert_eq!(config.recovery_guard_ttl(), RECOVERY_GUARD_TTL);
        assert_eq!(config.cleanup_interval, CLEANUP_INTERVAL);
        assert_eq!(config.queue_max_age, QUEUE_MAX_AGE);
        assert!(!config.bootstrap);
        assert!(!config.recovery);
        assert_eq!(config.nodes.len(), 1);
    }

    #[test]
    fn test_partial_document_deserializes() {
        let config: SynchronizerConfig = serde_json::from_str(
            r#"{"nodes": ["redis://a:6379", "redis://b:6379"], "recovery": true, "prefetch": 10}"#,
        )
        .unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert!(config.recovery);
        assert_eq!(config.prefetch, 10);
        assert_eq!(config.queue_max_age, QUEUE_MAX_AGE);
        assert_eq!(config.reconnect_interval_ms, 2000);
    }

    #[test]
    fn test_zero_cleanup_interval_is_clamped() {
        let config = SynchronizerConfig { cleanup_interval: 0, ..Default::default() };
        assert_eq!(config.effective_cleanup_interval(), 1);
    }

    #[test]
    fn test_zero_prefetch_never_saturates() {
        let unbounded = SynchronizerConfig { prefetch: 0, ..Default::default() };
        assert_eq!(unbounded.saturation_threshold(), None);
        let bounded = SynchronizerConfig { prefetch: 1, ..Default::default() };
        assert_eq!(bounded.saturation_threshold(), Some(1));
    }

    #[test]
    fn test_node_for_key_uses_node_count() {
        let config = SynchronizerConfig {
            nodes: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        assert_eq!(config.node_for_key("k"), NodeId::for_key("k", 3));
    }
}
