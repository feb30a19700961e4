// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message synchronizer.
//!
//! The [`MessageSynchronizer`] holds back each message until every key it
//! depends on has reached the required version, then hands it to the
//! execution queue. It ties together:
//! - one [`NodeSynchronizer`] per backend node
//! - the connect/disconnect/reconnect lifecycle
//! - queue-saturation recovery
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Connected ⇄ Reconnecting
//!                            ↓
//!                       Disconnected → ShutDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use causal_sync::{Dependency, MemoryBackend, Message, MessageSynchronizer, NodeId, SynchronizerConfig};
//! use tokio::sync::mpsc;
//!
//! struct Event { at: i64, deps: Vec<Dependency> }
//!
//! impl Message for Event {
//!     fn timestamp(&self) -> i64 { self.at }
//!     fn happens_before_dependencies(&self) -> &[Dependency] { &self.deps }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Event>>();
//! let sync = MessageSynchronizer::builder(SynchronizerConfig::default(), MemoryBackend::new(), tx).build();
//! sync.connect().await.expect("connect");
//!
//! sync.process_when_ready(Arc::new(Event {
//!     at: 1,
//!     deps: vec![Dependency::read("account:1", 3, NodeId(0))],
//! })).await;
//! // Released once account:1 reaches version 3.
//! # }
//! ```

mod callback;
mod dispatch;
mod lifecycle;
mod node;
mod recovery;
mod subscription;
mod types;

pub use callback::{Callback, DependencyWait};
pub use node::NodeSynchronizer;
pub use subscription::{Enqueued, KeySubscription};
pub use types::{RecoveredDependency, SynchronizerState, SynchronizerStats};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::config::SynchronizerConfig;
use crate::error::SyncError;
use crate::message::{Message, NodeId};
use crate::pipeline::{ErrorNotifier, ExecutionQueue, NoopTransport, Transport};

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    queued: u64,
    processed: u64,
}

/// State shared by the root handle, node loops and the reconnect timer.
pub(crate) struct Shared<M> {
    config: SynchronizerConfig,
    backend: Arc<dyn Backend>,
    transport: Arc<dyn Transport>,
    queue: Arc<dyn ExecutionQueue<M>>,
    notifier: Arc<dyn ErrorNotifier>,
    /// Serializes connect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    connected: AtomicBool,
    shut_down: AtomicBool,
    nodes: RwLock<Vec<Arc<NodeSynchronizer<M>>>>,
    counters: Mutex<Counters>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    /// Set by every connection loss, cleared when a reconnect starts.
    /// Written while holding `reconnect_timer`.
    rescue_pending: AtomicBool,
    state: watch::Sender<SynchronizerState>,
}

/// Root coordinator. Cheap to clone; clones share everything.
pub struct MessageSynchronizer<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for MessageSynchronizer<M> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

/// Builder for [`MessageSynchronizer`].
pub struct SynchronizerBuilder<M> {
    config: SynchronizerConfig,
    backend: Arc<dyn Backend>,
    queue: Arc<dyn ExecutionQueue<M>>,
    transport: Option<Arc<dyn Transport>>,
    notifier: Option<Arc<dyn ErrorNotifier>>,
}

impl<M: Message> SynchronizerBuilder<M> {
    /// Transport asked to redeliver unacked messages after each connect.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    #[must_use]
    pub fn error_notifier(mut self, notifier: impl ErrorNotifier + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    pub fn build(self) -> MessageSynchronizer<M> {
        let (state, _) = watch::channel(SynchronizerState::Created);
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(|_: &SyncError| {}));

        MessageSynchronizer {
            shared: Arc::new(Shared {
                config: self.config,
                backend: self.backend,
                transport: self.transport.unwrap_or_else(|| Arc::new(NoopTransport)),
                queue: self.queue,
                notifier,
                lifecycle: tokio::sync::Mutex::new(()),
                connected: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                nodes: RwLock::new(Vec::new()),
                counters: Mutex::new(Counters::default()),
                reconnect_timer: Mutex::new(None),
                rescue_pending: AtomicBool::new(false),
                state,
            }),
        }
    }
}

impl<M: Message> MessageSynchronizer<M> {
    pub fn builder(
        config: SynchronizerConfig,
        backend: impl Backend + 'static,
        queue: impl ExecutionQueue<M> + 'static,
    ) -> SynchronizerBuilder<M> {
        SynchronizerBuilder {
            config,
            backend: Arc::new(backend),
            queue: Arc::new(queue),
            transport: None,
            notifier: None,
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared<M>>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &SynchronizerConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn state(&self) -> SynchronizerState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SynchronizerState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Messages with dependencies still waiting.
    #[must_use]
    pub fn queued_messages(&self) -> u64 {
        self.shared.counters.lock().queued
    }

    /// Messages with dependencies released since the last connect.
    #[must_use]
    pub fn processed_messages(&self) -> u64 {
        self.shared.counters.lock().processed
    }

    pub async fn stats(&self) -> SynchronizerStats {
        let nodes = self.nodes();
        let mut subscriptions = 0;
        for node in &nodes {
            subscriptions += node.subscription_count().await;
        }
        let counters = *self.shared.counters.lock();

        SynchronizerStats {
            connected: self.is_connected(),
            nodes: nodes.len(),
            subscriptions,
            queued_messages: counters.queued,
            processed_messages: counters.processed,
        }
    }

    /// Connected node by id.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<Arc<NodeSynchronizer<M>>> {
        self.shared.nodes.read().get(node.0).cloned()
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<NodeSynchronizer<M>>> {
        self.shared.nodes.read().clone()
    }

    fn set_state(&self, state: SynchronizerState) {
        self.shared.state.send_replace(state);
    }
}
