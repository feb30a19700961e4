//! Connection lifecycle: connect, disconnect, reconnect, rescue and shutdown.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{MessageSynchronizer, NodeSynchronizer, Shared, SynchronizerState};
use crate::error::{Result, SyncError};
use crate::message::{Message, NodeId};
use crate::resilience::retry::{retry, RetryConfig};

impl<M: Message> MessageSynchronizer<M> {
    /// Open every node and start its notification loop. No-op when connected.
    ///
    /// Counters start from zero on each connect. After the nodes are up the
    /// transport is asked to redeliver unacked messages, unless `bootstrap`
    /// is set.
    #[tracing::instrument(skip(self), fields(nodes = self.shared.config.nodes.len()))]
    pub async fn connect(&self) -> Result<()> {
        {
            let _lifecycle = self.shared.lifecycle.lock().await;
            if self.shared.shut_down.load(Ordering::SeqCst) {
                return Err(SyncError::Connection("synchronizer has been shut down".to_string()));
            }
            if self.is_connected() {
                debug!("Already connected");
                return Ok(());
            }
            if self.shared.config.nodes.is_empty() {
                return Err(SyncError::Backend("no nodes configured".to_string()));
            }

            let previous = self.state();
            self.set_state(SynchronizerState::Connecting);
            *self.shared.counters.lock() = Default::default();
            crate::metrics::set_queued_messages(0);

            let mut started: Vec<Arc<NodeSynchronizer<M>>> = Vec::with_capacity(self.shared.config.nodes.len());
            for (index, url) in self.shared.config.nodes.iter().enumerate() {
                let node = NodeId(index);
                match self.shared.backend.connect(node, url).await {
                    Ok(connection) => {
                        debug!(node = %node, url = %url, "Node connected");
                        started.push(NodeSynchronizer::start(
                            node,
                            url.clone(),
                            connection,
                            Arc::downgrade(&self.shared),
                        ));
                    }
                    Err(e) => {
                        error!(node = %node, url = %url, error = %e, "Failed to connect node");
                        crate::metrics::record_error("connect");
                        for node in started {
                            node.stop_main_loop();
                            let _ = node.close().await;
                        }
                        self.set_state(previous);
                        return Err(e);
                    }
                }
            }

            let count = started.len();
            *self.shared.nodes.write() = started;
            self.shared.connected.store(true, Ordering::SeqCst);
            crate::metrics::set_connected(true);
            self.set_state(SynchronizerState::Connected);
            info!(nodes = count, "Synchronizer connected");
        }

        if !self.shared.config.bootstrap {
            if let Err(e) = self.shared.transport.recover().await {
                warn!(error = %e, "Transport recover failed");
                crate::metrics::record_error("transport");
                self.shared.notifier.notify(&e);
            }
        }
        Ok(())
    }

    /// Stop and close every node. No-op when not connected.
    ///
    /// Pending waits are abandoned; the transport redelivers those messages
    /// after the next connect.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if !self.shared.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        crate::metrics::set_connected(false);

        let nodes = std::mem::take(&mut *self.shared.nodes.write());
        for node in nodes {
            node.stop_main_loop();
            let abandoned = node.clear_subscriptions().await;
            if abandoned > 0 {
                debug!(node = %node.node(), abandoned, "Abandoned pending waits");
            }
            if let Err(e) = node.close().await {
                debug!(node = %node.node(), error = %e, "Error closing node connection");
            }
        }

        self.set_state(SynchronizerState::Disconnected);
        info!("Synchronizer disconnected");
    }

    /// Disconnect, then connect again.
    ///
    /// Fails if a connection is lost again before the new connection is
    /// fully up, so the reconnect timer tries once more. A running timer
    /// finds nothing left to do after a successful call and stops.
    #[tracing::instrument(skip(self))]
    pub async fn reconnect(&self) -> Result<()> {
        {
            let _timer = self.shared.reconnect_timer.lock();
            self.shared.rescue_pending.store(false, Ordering::SeqCst);
        }
        self.disconnect().await;
        if let Err(e) = self.connect().await {
            // Still down: the next timer pass must try again
            let timer = self.shared.reconnect_timer.lock();
            self.shared.rescue_pending.store(true, Ordering::SeqCst);
            if timer_running(&timer) {
                self.set_state(SynchronizerState::Reconnecting);
            }
            return Err(e);
        }

        if self.shared.rescue_pending.load(Ordering::SeqCst) {
            self.set_state(SynchronizerState::Reconnecting);
            return Err(SyncError::Connection("connection lost again during reconnect".to_string()));
        }
        crate::metrics::record_reconnect();
        info!("Synchronizer reconnected");
        Ok(())
    }

    /// Handle an unexpected connection loss on `node`.
    ///
    /// Reports the loss and makes sure the reconnect timer runs. The
    /// reconnect itself always happens on the timer task.
    pub(crate) fn rescue_connection(&self, node: NodeId, cause: SyncError) {
        let error = SyncError::lost_connection(node, cause);
        warn!(node = %node, error = %error, "Connection lost, scheduling reconnect");
        crate::metrics::record_connection_lost(node);
        self.shared.notifier.notify(&error);

        if self.shared.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let mut timer = self.shared.reconnect_timer.lock();
        self.shared.rescue_pending.store(true, Ordering::SeqCst);
        self.set_state(SynchronizerState::Reconnecting);
        if timer_running(&timer) {
            return;
        }
        let interval = self.shared.config.reconnect_interval();
        *timer = Some(tokio::spawn(Self::reconnect_timer(Arc::downgrade(&self.shared), interval)));
    }

    /// One pass of the reconnect timer. `Ok` ends the timer.
    async fn reconnect_attempt(&self) -> Result<()> {
        let needed = !self.shared.shut_down.load(Ordering::SeqCst)
            && self.shared.rescue_pending.load(Ordering::SeqCst);
        let result = if needed { self.reconnect().await } else { Ok(()) };

        // A loss reported after this point spawns a fresh timer.
        let mut timer = self.shared.reconnect_timer.lock();
        if self.shared.shut_down.load(Ordering::SeqCst) {
            timer.take();
            return Ok(());
        }
        result?;
        if self.shared.rescue_pending.load(Ordering::SeqCst) {
            return Err(SyncError::Connection("connection lost again during reconnect".to_string()));
        }
        timer.take();
        Ok(())
    }

    fn reconnect_timer(shared: Weak<Shared<M>>, interval: Duration) -> BoxFuture<'static, ()> {
        async move {
            sleep(interval).await;
            let _ = retry("reconnect", &RetryConfig::fixed(interval), || {
                let shared = shared.clone();
                async move {
                    match shared.upgrade() {
                        Some(shared) => MessageSynchronizer::from_shared(shared).reconnect_attempt().await,
                        None => Ok(()),
                    }
                }
            })
            .await;
        }
        .boxed()
    }

    /// Cancel the reconnect timer and disconnect for good.
    ///
    /// A reconnect already opening nodes finishes first, so everything it
    /// opened is closed here.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Shutting down synchronizer");
        self.shared.shut_down.store(true, Ordering::SeqCst);
        {
            let _lifecycle = self.shared.lifecycle.lock().await;
            if let Some(timer) = self.shared.reconnect_timer.lock().take() {
                timer.abort();
            }
        }
        self.disconnect().await;
        self.set_state(SynchronizerState::ShutDown);
    }
}

fn timer_running(timer: &Option<JoinHandle<()>>) -> bool {
    timer.as_ref().is_some_and(|handle| !handle.is_finished())
}
