// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue-saturation recovery.
//!
//! When as many messages are waiting as the transport will prefetch, no new
//! message can arrive to move a key forward. The oldest blocked message then
//! has its dependency keys forced up to the versions it needs, which
//! publishes them and releases it.
//!
//! Only write dependencies carry a guard key, so two processes recovering the
//! same write within the guard TTL apply it once.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{MessageSynchronizer, RecoveredDependency};
use crate::error::{Result, SyncError};
use crate::message::Message;

impl<M: Message> MessageSynchronizer<M> {
    /// Recover the oldest blocked message when the queue is saturated.
    pub(crate) async fn maybe_recover(&self) {
        let Some(threshold) = self.shared.config.saturation_threshold() else { return };
        let queued = self.queued_messages();
        if queued < threshold {
            return;
        }

        let blocked = self.blocked_messages().await;
        let Some(oldest) = blocked.first() else { return };
        debug!(queued, blocked = blocked.len(), timestamp = oldest.timestamp(), "Queue saturated, recovering");

        if let Err(e) = self.recover_dependencies_for(oldest).await {
            warn!(error = %e, "Recovery failed");
            crate::metrics::record_error("recovery");
            self.shared.notifier.notify(&e);
        }
    }

    /// Head of every key's wait queue across all nodes, oldest first.
    /// A message blocking several keys appears once.
    pub async fn blocked_messages(&self) -> Vec<Arc<M>> {
        let mut seen = HashSet::new();
        let mut blocked = Vec::new();
        for node in self.nodes() {
            for message in node.blocked_messages().await {
                if seen.insert(Arc::as_ptr(&message) as usize) {
                    blocked.push(message);
                }
            }
        }
        blocked.sort_by_key(|message| message.timestamp());
        blocked
    }

    /// Force every dependency key of `message` up to its required version.
    ///
    /// Returns the keys that actually moved. Keys already there, and guarded
    /// writes another recovery just applied, are left alone.
    pub async fn recover_dependencies_for(&self, message: &M) -> Result<Vec<RecoveredDependency>> {
        let mut recovered = Vec::new();
        for dependency in message.happens_before_dependencies().iter().filter(|d| d.needs_wait()) {
            let node = self
                .node(dependency.node)
                .ok_or(SyncError::UnknownNode(dependency.node))?;
            if let Some(delta) = node.recover(dependency).await? {
                recovered.push(RecoveredDependency {
                    key: dependency.key.clone(),
                    version: dependency.version,
                    delta,
                });
            }
        }

        if !recovered.is_empty() {
            let increments = recovered
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            warn!(timestamp = message.timestamp(), increments = %increments, "Recovered message dependencies");
            crate::metrics::record_recovery(recovered.len());
        }
        Ok(recovered)
    }
}
