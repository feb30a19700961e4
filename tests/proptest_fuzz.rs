//! Property-based tests for key subscriptions and dependency helpers.
//!
//! Uses proptest to drive random version sequences through a subscription
//! and check it never goes backwards or releases a callback early.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;

use proptest::prelude::*;

use causal_sync::synchronizer::{Callback, DependencyWait, Enqueued, KeySubscription};
use causal_sync::{Dependency, Message, NodeId};

// =============================================================================
// Helpers
// =============================================================================

struct Waiting {
    id: usize,
    deps: Vec<Dependency>,
}

impl Message for Waiting {
    fn timestamp(&self) -> i64 {
        self.id as i64
    }

    fn happens_before_dependencies(&self) -> &[Dependency] {
        &self.deps
    }
}

fn callback(id: usize, version: u64) -> Callback<Waiting> {
    let message = Waiting { id, deps: vec![Dependency::read("k", version, NodeId(0))] };
    Callback::new(version, DependencyWait::new(Arc::new(message)))
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// last_version is the running maximum of every signal.
    #[test]
    fn last_version_never_decreases(signals in prop::collection::vec(0u64..1000, 1..100)) {
        let sub: KeySubscription<Waiting> = KeySubscription::new("k", 0);
        let mut high = 0;
        for signal in signals {
            sub.signal_version(signal);
            high = high.max(signal);
            prop_assert_eq!(sub.last_version(), high);
        }
    }

    /// Every released callback is satisfied; releases are sorted by required
    /// version with ties in registration order; nothing satisfied stays queued.
    #[test]
    fn releases_are_never_early_and_ordered(
        required in prop::collection::vec(1u64..50, 1..40),
        signals in prop::collection::vec(0u64..60, 1..20),
    ) {
        let sub = KeySubscription::new("k", 0);
        for (id, version) in required.iter().enumerate() {
            prop_assert!(sub.add_callback(callback(id, *version), 0).is_queued());
        }

        let mut released: Vec<(u64, usize)> = Vec::new();
        for signal in signals {
            let current = sub.last_version().max(signal);
            let batch = sub.signal_version(signal);
            for cb in &batch {
                prop_assert!(cb.can_perform(current));
            }
            released.extend(batch.iter().map(|cb| (cb.required_version(), cb.message().id)));

            if let Some(head) = sub.head_message() {
                prop_assert!(head.deps[0].version > current);
            }
        }

        let mut sorted = released.clone();
        sorted.sort();
        prop_assert_eq!(released.clone(), sorted);
        prop_assert_eq!(released.len() + sub.pending_len(), required.len());
    }

    /// A callback registered at or below the last version is handed straight back.
    #[test]
    fn satisfied_callbacks_are_never_queued(seen in 1u64..100, required in 1u64..100) {
        let sub = KeySubscription::new("k", 0);
        sub.signal_version(seen);
        let enqueued = sub.add_callback(callback(0, required), 0);
        prop_assert_eq!(matches!(enqueued, Enqueued::Ready(_)), required <= seen);
    }

    /// Key placement is deterministic and always in range.
    #[test]
    fn node_for_key_in_range(key in "[a-z:0-9]{1,32}", nodes in 1usize..16) {
        let node = NodeId::for_key(&key, nodes);
        prop_assert!(node.0 < nodes);
        prop_assert_eq!(node, NodeId::for_key(&key, nodes));
    }

    /// Only write dependencies get a guard key.
    #[test]
    fn guard_key_only_for_writes(key in "[a-z]{1,16}", version in 0u64..10, is_write in any::<bool>()) {
        let dep = Dependency { key: key.clone(), version, is_write, node: NodeId(0) };
        prop_assert_eq!(dep.guard_key().is_some(), is_write);
        prop_assert_eq!(dep.needs_wait(), version > 0);
    }
}
