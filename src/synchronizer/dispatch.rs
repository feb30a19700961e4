//! Message dispatch: walk each message's dependencies in order, then hand it
//! to the execution queue.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::callback::{Callback, DependencyWait};
use super::subscription::Enqueued;
use super::MessageSynchronizer;
use crate::error::SyncError;
use crate::message::Message;

impl<M: Message> MessageSynchronizer<M> {
    /// Process `message` once all its dependencies are satisfied.
    ///
    /// Without dependencies the message goes straight to the execution queue,
    /// connected or not. With dependencies it is dropped while disconnected;
    /// the transport redelivers it after the next connect.
    pub async fn process_when_ready(&self, message: Arc<M>) {
        if !message.has_dependencies() {
            self.process_message(message).await;
            return;
        }
        if !self.is_connected() {
            debug!(timestamp = message.timestamp(), "Not connected, dropping message");
            crate::metrics::record_dropped("disconnected");
            return;
        }

        let queued = {
            let mut counters = self.shared.counters.lock();
            counters.queued += 1;
            counters.queued
        };
        crate::metrics::set_queued_messages(queued);

        self.advance(DependencyWait::new(message)).await;
    }

    /// Continue a wait released by a node: its current dependency is met.
    pub(crate) async fn resume(&self, callback: Callback<M>) {
        self.advance(callback.into_wait().advance()).await;
    }

    async fn advance(&self, mut wait: DependencyWait<M>) {
        loop {
            let Some(dependency) = wait.dependency() else {
                self.process_message(wait.into_message()).await;
                return;
            };
            if !dependency.needs_wait() {
                wait = wait.advance();
                continue;
            }

            let key = dependency.key.clone();
            let version = dependency.version;
            let node_id = dependency.node;

            let Some(node) = self.node(node_id) else {
                let reason = if self.is_connected() {
                    SyncError::UnknownNode(node_id)
                } else {
                    SyncError::NotConnected
                };
                self.abandon(&key, &reason);
                return;
            };

            match node.on_version(&key, version, wait, self.processed_messages()).await {
                Ok(Enqueued::Ready(callback)) => wait = callback.into_wait().advance(),
                Ok(Enqueued::Queued) => {
                    trace!(node = %node_id, key = %key, version, "Waiting for version");
                    if self.shared.config.recovery {
                        self.maybe_recover().await;
                    }
                    return;
                }
                Err(e) => {
                    if e.is_connection_loss() {
                        self.rescue_connection(node_id, e.clone());
                    }
                    self.abandon(&key, &e);
                    return;
                }
            }
        }
    }

    /// Hand `message` to the execution queue.
    ///
    /// Messages with dependencies move from queued to processed, and every
    /// `cleanup_interval` processed messages stale subscriptions are dropped.
    pub async fn process_message(&self, message: Arc<M>) {
        let has_dependencies = message.has_dependencies();
        self.shared.queue.push(message);
        if !has_dependencies {
            return;
        }
        crate::metrics::record_processed();

        let (queued, processed) = {
            let mut counters = self.shared.counters.lock();
            counters.queued = counters.queued.saturating_sub(1);
            counters.processed += 1;
            (counters.queued, counters.processed)
        };
        crate::metrics::set_queued_messages(queued);

        if processed % self.shared.config.effective_cleanup_interval() == 0 {
            let max_age = self.shared.config.queue_max_age;
            for node in self.nodes() {
                node.cleanup_if_old(processed, max_age).await;
            }
        }
    }

    /// A queued message left its chain without being processed.
    fn abandon(&self, key: &str, reason: &SyncError) {
        let queued = {
            let mut counters = self.shared.counters.lock();
            counters.queued = counters.queued.saturating_sub(1);
            counters.queued
        };
        crate::metrics::set_queued_messages(queued);

        match reason {
            SyncError::NotConnected => {
                debug!(key = %key, "Node stopped, dropping message");
                crate::metrics::record_dropped("disconnected");
            }
            SyncError::UnknownNode(_) => {
                warn!(key = %key, error = %reason, "Dependency on unknown node, dropping message");
                crate::metrics::record_dropped("unknown_node");
            }
            _ => {
                warn!(key = %key, error = %reason, "Subscribe failed, dropping message");
                crate::metrics::record_dropped("subscribe_failed");
            }
        }
    }
}
