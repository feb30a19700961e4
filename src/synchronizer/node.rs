// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-node synchronizer.
//!
//! A [`NodeSynchronizer`] owns the connections of one backend node, the
//! registry of key subscriptions on it, and the task that turns the node's
//! notification stream into released callbacks.
//!
//! # Notification loop
//!
//! ```text
//! Subscribed(key)        → read current version → release satisfied callbacks
//! Message(key, version)  → signal version       → release satisfied callbacks
//! Unsubscribed(key)      → ignored
//! stream closed / error  → root.rescue_connection (unless stopped)
//! ```
//!
//! Released callbacks are resumed on the loop task, in release order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, trace};

use super::callback::{Callback, DependencyWait};
use super::subscription::{Enqueued, KeySubscription};
use super::{MessageSynchronizer, Shared};
use crate::backend::{
    NodeConnection, Notification, NotificationReceiver, SubscriberConnection, WorkerConnection,
};
use crate::error::SyncError;
use crate::message::{Dependency, Message, NodeId};

pub struct NodeSynchronizer<M> {
    node: NodeId,
    url: String,
    subscriber: Arc<dyn SubscriberConnection>,
    worker: Arc<dyn WorkerConnection>,
    /// Held across subscribe/unsubscribe sends so the two never reorder for a key.
    subscriptions: Mutex<HashMap<String, Arc<KeySubscription<M>>>>,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl<M: Message> NodeSynchronizer<M> {
    /// Take ownership of a node's connections and start its notification loop.
    pub(crate) fn start(
        node: NodeId,
        url: String,
        connection: NodeConnection,
        root: Weak<Shared<M>>,
    ) -> Arc<Self> {
        let NodeConnection { subscriber, worker, notifications } = connection;
        let (stop_tx, stop_rx) = watch::channel(false);

        let this = Arc::new(Self {
            node,
            url,
            subscriber,
            worker,
            subscriptions: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            stop_tx,
        });

        tokio::spawn(this.clone().run_main_loop(notifications, stop_rx, root));
        this
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // Boxed: the loop reaches `rescue_connection`, whose timer reconnects and
    // spawns a new loop, so the future type would otherwise contain itself.
    fn run_main_loop(
        self: Arc<Self>,
        mut notifications: NotificationReceiver,
        mut stop_rx: watch::Receiver<bool>,
        root: Weak<Shared<M>>,
    ) -> BoxFuture<'static, ()> {
        async move {
            debug!(node = %self.node, url = %self.url, "Notification loop started");

            loop {
                let event = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    event = notifications.recv() => event,
                };
                if self.is_stopped() {
                    break;
                }

                let result = match event {
                    Some(Ok(notification)) => self.handle_notification(notification, &root).await,
                    Some(Err(e)) => Err(e),
                    None => Err(SyncError::Connection("notification stream closed".to_string())),
                };

                let Err(e) = result else { continue };
                if self.is_stopped() {
                    break;
                }
                let Some(shared) = root.upgrade() else { break };

                if e.is_connection_loss() {
                    MessageSynchronizer::from_shared(shared).rescue_connection(self.node, e);
                } else {
                    error!(node = %self.node, url = %self.url, error = %e, "Notification loop failed");
                    crate::metrics::record_error("protocol");
                    shared.notifier.notify(&e);
                }
                break;
            }

            debug!(node = %self.node, "Notification loop stopped");
        }
        .boxed()
    }

    async fn handle_notification(
        &self,
        notification: Notification,
        root: &Weak<Shared<M>>,
    ) -> Result<(), SyncError> {
        let released = match notification {
            Notification::Subscribed(key) => {
                let Some(subscription) = self.subscription(&key).await else {
                    trace!(node = %self.node, key = %key, "Ack for removed subscription");
                    return Ok(());
                };
                subscription.finalize_subscription(self.worker.as_ref()).await?
            }
            Notification::Unsubscribed(_) => return Ok(()),
            Notification::Message { channel, payload } => {
                let version = payload.trim().parse::<u64>().map_err(|_| {
                    SyncError::Protocol(format!(
                        "Invalid version payload {:?} on channel {}",
                        payload, channel
                    ))
                })?;
                let Some(subscription) = self.subscription(&channel).await else {
                    return Ok(());
                };
                trace!(node = %self.node, key = %channel, version, "Version update");
                subscription.signal_version(version)
            }
        };

        self.release(released, root).await;
        Ok(())
    }

    async fn release(&self, released: Vec<Callback<M>>, root: &Weak<Shared<M>>) {
        if released.is_empty() {
            return;
        }
        crate::metrics::record_released(self.node, released.len());

        let Some(shared) = root.upgrade() else { return };
        let synchronizer = MessageSynchronizer::from_shared(shared);
        for callback in released {
            synchronizer.resume(callback).await;
        }
    }

    /// Wait for `key` to reach `required_version` on this node.
    ///
    /// Version 0 is ready at once, without touching the registry or network.
    /// Otherwise the key's subscription is created and subscribed if needed,
    /// and the wait is parked on it unless the version is already there.
    pub async fn on_version(
        &self,
        key: &str,
        required_version: u64,
        wait: DependencyWait<M>,
        activity_marker: u64,
    ) -> Result<Enqueued<M>, SyncError> {
        let callback = Callback::new(required_version, wait);
        if required_version == 0 {
            return Ok(Enqueued::Ready(callback));
        }
        if self.is_stopped() {
            return Err(SyncError::NotConnected);
        }

        let mut subscriptions = self.subscriptions.lock().await;
        let subscription = subscriptions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeySubscription::new(key, activity_marker)))
            .clone();
        subscription.subscribe(self.subscriber.as_ref()).await?;

        let enqueued = subscription.add_callback(callback, activity_marker);
        let count = subscriptions.len();
        drop(subscriptions);

        crate::metrics::set_subscriptions(self.node, count);
        Ok(enqueued)
    }

    pub async fn subscription(&self, key: &str) -> Option<Arc<KeySubscription<M>>> {
        self.subscriptions.lock().await.get(key).cloned()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Unsubscribe and remove every stale subscription. Returns how many went.
    pub async fn cleanup_if_old(&self, processed: u64, max_age: u64) -> usize {
        let mut subscriptions = self.subscriptions.lock().await;
        let stale: Vec<String> = subscriptions
            .iter()
            .filter(|(_, subscription)| subscription.is_old(processed, max_age))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            let Some(subscription) = subscriptions.remove(key) else { continue };
            if let Err(e) = subscription.unsubscribe(self.subscriber.as_ref()).await {
                debug!(node = %self.node, key = %key, error = %e, "Unsubscribe failed");
            }
        }
        let remaining = subscriptions.len();
        drop(subscriptions);

        if !stale.is_empty() {
            debug!(node = %self.node, removed = stale.len(), remaining, "Removed stale subscriptions");
            crate::metrics::record_cleanup(self.node, stale.len());
            crate::metrics::set_subscriptions(self.node, remaining);
        }
        stale.len()
    }

    /// Next message to be released on each key of this node.
    pub async fn blocked_messages(&self) -> Vec<Arc<M>> {
        self.subscriptions
            .lock()
            .await
            .values()
            .filter_map(|subscription| subscription.head_message())
            .collect()
    }

    /// Run the recovery script for one dependency on this node's worker.
    pub async fn recover(&self, dependency: &Dependency) -> Result<Option<u64>, SyncError> {
        let guard = dependency.guard_key();
        self.worker
            .recover(&dependency.key, dependency.version, guard.as_deref())
            .await
    }

    /// Signal the loop to exit. Nothing is delivered after this returns.
    pub fn stop_main_loop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }

    /// Drop every subscription, abandoning their waits. Returns how many
    /// callbacks were abandoned.
    pub async fn clear_subscriptions(&self) -> usize {
        let drained: Vec<_> = self.subscriptions.lock().await.drain().collect();
        crate::metrics::set_subscriptions(self.node, 0);
        drained.iter().map(|(_, subscription)| subscription.pending_len()).sum()
    }

    pub async fn close(&self) -> Result<(), SyncError> {
        self.subscriber.close().await
    }
}
