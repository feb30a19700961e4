// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Messages and their happens-before dependencies.
//!
//! The synchronizer never looks inside a message. It only needs a timestamp
//! (to pick a recovery candidate) and the ordered list of [`Dependency`]s the
//! message must wait on.
//!
//! # Example
//!
//! ```
//! use causal_sync::{Dependency, Message, NodeId};
//!
//! struct Order { placed_at: i64, deps: Vec<Dependency> }
//!
//! impl Message for Order {
//!     fn timestamp(&self) -> i64 { self.placed_at }
//!     fn happens_before_dependencies(&self) -> &[Dependency] { &self.deps }
//! }
//!
//! let node = NodeId::for_key("customer:42", 1);
//! let order = Order {
//!     placed_at: 1_767_084_657_058,
//!     deps: vec![Dependency::write("customer:42", 7, node)],
//! };
//! assert!(order.has_dependencies());
//! assert_eq!(order.happens_before_dependencies()[0].guard_key().as_deref(), Some("customer:42:recovery_guard"));
//! ```

use sha2::{Digest, Sha256};

/// Suffix appended to a key to form its recovery guard key.
pub const RECOVERY_GUARD_SUFFIX: &str = "recovery_guard";

/// Index of a backend node in the configured node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Deterministically place `key` on one of `node_count` nodes.
    ///
    /// Uses the first 8 bytes of the key's SHA-256 so every process that
    /// shares the node list agrees on placement.
    #[must_use]
    pub fn for_key(key: &str, node_count: usize) -> Self {
        if node_count <= 1 {
            return Self(0);
        }
        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self((u64::from_be_bytes(prefix) % node_count as u64) as usize)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A versioned key a message must wait on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub key: String,
    /// Minimum version `key` must reach. 0 means no wait.
    pub version: u64,
    pub is_write: bool,
    pub node: NodeId,
}

impl Dependency {
    pub fn read(key: impl Into<String>, version: u64, node: NodeId) -> Self {
        Self { key: key.into(), version, is_write: false, node }
    }

    pub fn write(key: impl Into<String>, version: u64, node: NodeId) -> Self {
        Self { key: key.into(), version, is_write: true, node }
    }

    #[must_use]
    pub fn needs_wait(&self) -> bool {
        self.version > 0
    }

    /// Guard key used by recovery. Only write dependencies are guarded.
    #[must_use]
    pub fn guard_key(&self) -> Option<String> {
        self.is_write
            .then(|| format!("{}:{}", self.key, RECOVERY_GUARD_SUFFIX))
    }
}

/// A message whose processing is gated on its dependencies.
pub trait Message: Send + Sync + 'static {
    /// Creation time, used to pick the oldest blocked message for recovery.
    fn timestamp(&self) -> i64;

    /// Dependencies in the order they must be waited on.
    fn happens_before_dependencies(&self) -> &[Dependency];

    fn has_dependencies(&self) -> bool {
        !self.happens_before_dependencies().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_always_zero() {
        assert_eq!(NodeId::for_key("anything", 0), NodeId(0));
        assert_eq!(NodeId::for_key("anything", 1), NodeId(0));
    }

    #[test]
    fn test_for_key_is_stable_and_in_range() {
        for i in 0..200 {
            let key = format!("user:{}", i);
            let node = NodeId::for_key(&key, 3);
            assert!(node.0 < 3);
            assert_eq!(node, NodeId::for_key(&key, 3));
        }
    }

    #[test]
    fn test_for_key_spreads_keys() {
        let mut seen = [false; 4];
        for i in 0..200 {
            seen[NodeId::for_key(&format!("k{}", i), 4).0] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_guard_key_only_for_writes() {
        assert_eq!(Dependency::read("a", 1, NodeId(0)).guard_key(), None);
        assert_eq!(
            Dependency::write("a", 1, NodeId(0)).guard_key(),
            Some("a:recovery_guard".to_string())
        );
    }

    #[test]
    fn test_needs_wait() {
        assert!(!Dependency::read("a", 0, NodeId(0)).needs_wait());
        assert!(Dependency::read("a", 3, NodeId(0)).needs_wait());
    }
}
