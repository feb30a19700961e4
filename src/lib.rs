//! # Causal Sync
//!
//! Happens-before message synchronization over versioned keys.
//!
//! Each message names the keys it depends on and the minimum version each must
//! reach. The synchronizer holds the message back until those versions are
//! visible in the backend store, then hands it to the execution queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MessageSynchronizer                      │
//! │  • process_when_ready(): walks dependencies in order       │
//! │  • connect / disconnect / reconnect lifecycle              │
//! │  • recovery when the queue saturates                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (one per backend node)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NodeSynchronizer                        │
//! │  • notification loop on the subscriber connection          │
//! │  • key → KeySubscription registry                          │
//! │  • stale subscription cleanup                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     KeySubscription                         │
//! │  • last seen version (never decreases)                     │
//! │  • min-heap of callbacks by required version               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Backend (Redis or Memory)                   │
//! │  • pub/sub notifications per key                           │
//! │  • GET + atomic recovery script                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use causal_sync::{Dependency, Message, MessageSynchronizer, RedisBackend, SynchronizerConfig};
//! use tokio::sync::mpsc;
//!
//! struct Transfer { at: i64, deps: Vec<Dependency> }
//!
//! impl Message for Transfer {
//!     fn timestamp(&self) -> i64 { self.at }
//!     fn happens_before_dependencies(&self) -> &[Dependency] { &self.deps }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SynchronizerConfig {
//!         nodes: vec!["redis://localhost:6379".into()],
//!         recovery: true,
//!         ..Default::default()
//!     };
//!
//!     let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Transfer>>();
//!     let backend = RedisBackend::new(&config);
//!     let node = config.node_for_key("account:42");
//!     let sync = MessageSynchronizer::builder(config, backend, tx).build();
//!     sync.connect().await.expect("Failed to connect");
//!
//!     sync.process_when_ready(Arc::new(Transfer {
//!         at: 1_767_084_657_058,
//!         deps: vec![Dependency::write("account:42", 7, node)],
//!     })).await;
//!
//!     // Arrives once account:42 has reached version 7
//!     let ready = rx.recv().await;
//!     assert!(ready.is_some());
//!
//!     sync.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`synchronizer`]: [`MessageSynchronizer`], node loops, subscriptions
//! - [`backend`]: store backends (Redis, Memory) and the recovery script
//! - [`pipeline`]: execution queue, transport and error notifier seams
//! - [`message`]: the [`Message`] trait and [`Dependency`]
//! - [`resilience`]: retry logic for connections

pub mod backend;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod resilience;
pub mod synchronizer;

pub use backend::{Backend, MemoryBackend, Notification, RecoveryScript, RedisBackend};
pub use config::SynchronizerConfig;
pub use error::{Result, SyncError};
pub use message::{Dependency, Message, NodeId};
pub use pipeline::{ErrorNotifier, ExecutionQueue, NoopTransport, Transport};
pub use resilience::retry::RetryConfig;
pub use synchronizer::{
    MessageSynchronizer, NodeSynchronizer, RecoveredDependency, SynchronizerBuilder,
    SynchronizerState, SynchronizerStats,
};
