//! In-process backend: a single versioned key store with pub/sub fan-out.
//!
//! Every node connected through the same [`MemoryBackend`] shares one store.
//! The recovery logic runs under the store lock, so it is atomic the same way
//! the Lua script is on Redis.
//!
//! Fault injection for tests:
//! - [`MemoryBackend::sever_connections`] drops every subscriber stream
//! - [`MemoryBackend::refuse_connections`] makes `connect` fail

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{
    Backend, NodeConnection, Notification, NotificationSender, SubscriberConnection,
    WorkerConnection,
};
use crate::config::RECOVERY_GUARD_TTL;
use crate::error::SyncError;
use crate::message::NodeId;

#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<MemoryStore>,
}

struct MemoryStore {
    state: Mutex<StoreState>,
    guard_ttl: Duration,
    refuse: AtomicBool,
    next_subscriber: AtomicU64,
}

#[derive(Default)]
struct StoreState {
    values: HashMap<String, u64>,
    guards: HashMap<String, Instant>,
    subscribers: HashMap<u64, SubscriberEntry>,
    subscribe_requests: HashMap<String, usize>,
    unsubscribe_requests: HashMap<String, usize>,
    connects: usize,
    closes: usize,
}

struct SubscriberEntry {
    channels: HashSet<String>,
    tx: NotificationSender,
}

impl StoreState {
    fn publish(&self, key: &str, version: u64) {
        for entry in self.subscribers.values() {
            if entry.channels.contains(key) {
                let _ = entry.tx.send(Ok(Notification::Message {
                    channel: key.to_string(),
                    payload: version.to_string(),
                }));
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::with_guard_ttl(RECOVERY_GUARD_TTL)
    }

    #[must_use]
    pub fn with_guard_ttl(guard_ttl: Duration) -> Self {
        Self {
            store: Arc::new(MemoryStore {
                state: Mutex::new(StoreState::default()),
                guard_ttl,
                refuse: AtomicBool::new(false),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Store a new version and publish it, as a producer would.
    pub fn set_version(&self, key: &str, version: u64) {
        let mut state = self.store.state.lock();
        state.values.insert(key.to_string(), version);
        state.publish(key, version);
    }

    /// Store a version without publishing it.
    pub fn store_version(&self, key: &str, version: u64) {
        self.store.state.lock().values.insert(key.to_string(), version);
    }

    /// Publish a version without storing it (stale or duplicate deliveries).
    pub fn publish(&self, key: &str, version: u64) {
        self.store.state.lock().publish(key, version);
    }

    /// Publish a raw payload on `key`'s channel.
    pub fn publish_raw(&self, key: &str, payload: &str) {
        let state = self.store.state.lock();
        for entry in state.subscribers.values() {
            if entry.channels.contains(key) {
                let _ = entry.tx.send(Ok(Notification::Message {
                    channel: key.to_string(),
                    payload: payload.to_string(),
                }));
            }
        }
    }

    #[must_use]
    pub fn version(&self, key: &str) -> u64 {
        self.store.state.lock().values.get(key).copied().unwrap_or(0)
    }

    /// Apply the recovery logic directly, as the script would on the server.
    pub fn recover(&self, key: &str, wanted_version: u64, guard_key: Option<&str>) -> Option<u64> {
        self.store.recover(key, wanted_version, guard_key)
    }

    #[must_use]
    pub fn subscribe_requests(&self, key: &str) -> usize {
        self.store.state.lock().subscribe_requests.get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn unsubscribe_requests(&self, key: &str) -> usize {
        self.store.state.lock().unsubscribe_requests.get(key).copied().unwrap_or(0)
    }

    /// Whether any live subscriber is subscribed to `key`.
    #[must_use]
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.store
            .state
            .lock()
            .subscribers
            .values()
            .any(|entry| entry.channels.contains(key))
    }

    /// Number of successful connects.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.store.state.lock().connects
    }

    /// Number of subscriber connections closed by their owner.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.store.state.lock().closes
    }

    /// Subscriber connections neither closed nor severed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.store.state.lock().subscribers.len()
    }

    /// Drop every subscriber stream, as if the server reset the connections.
    pub fn sever_connections(&self) {
        self.store.state.lock().subscribers.clear();
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.store.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl MemoryStore {
    fn recover(&self, key: &str, wanted_version: u64, guard_key: Option<&str>) -> Option<u64> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.guards.retain(|_, expires_at| *expires_at > now);

        if let Some(guard) = guard_key {
            if state.guards.contains_key(guard) {
                return None;
            }
        }

        let current = state.values.get(key).copied().unwrap_or(0);
        if wanted_version <= current {
            return None;
        }

        if let Some(guard) = guard_key {
            state.guards.insert(guard.to_string(), now + self.guard_ttl);
        }
        state.values.insert(key.to_string(), wanted_version);
        state.publish(key, wanted_version);
        Some(wanted_version - current)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn connect(&self, _node: NodeId, url: &str) -> Result<NodeConnection, SyncError> {
        if self.store.refuse.load(Ordering::SeqCst) {
            return Err(SyncError::Connection(format!("connection refused: {}", url)));
        }

        let id = self.store.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.store.state.lock();
            state.subscribers.insert(id, SubscriberEntry { channels: HashSet::new(), tx });
            state.connects += 1;
        }

        Ok(NodeConnection {
            subscriber: Arc::new(MemorySubscriber { id, store: self.store.clone() }),
            worker: Arc::new(MemoryWorker { store: self.store.clone() }),
            notifications: rx,
        })
    }
}

struct MemorySubscriber {
    id: u64,
    store: Arc<MemoryStore>,
}

impl MemorySubscriber {
    fn with_entry<F>(&self, key: &str, f: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut StoreState, &str) -> Option<Notification>,
    {
        let mut state = self.store.state.lock();
        let ack = f(&mut *state, key);
        let entry = state
            .subscribers
            .get(&self.id)
            .ok_or_else(|| SyncError::Connection("subscriber connection closed".to_string()))?;
        if let Some(ack) = ack {
            let _ = entry.tx.send(Ok(ack));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriberConnection for MemorySubscriber {
    async fn subscribe(&self, key: &str) -> Result<(), SyncError> {
        let id = self.id;
        self.with_entry(key, |state, key| {
            state.subscribers.get_mut(&id)?.channels.insert(key.to_string());
            *state.subscribe_requests.entry(key.to_string()).or_default() += 1;
            Some(Notification::Subscribed(key.to_string()))
        })
    }

    async fn unsubscribe(&self, key: &str) -> Result<(), SyncError> {
        let id = self.id;
        self.with_entry(key, |state, key| {
            state.subscribers.get_mut(&id)?.channels.remove(key);
            *state.unsubscribe_requests.entry(key.to_string()).or_default() += 1;
            Some(Notification::Unsubscribed(key.to_string()))
        })
    }

    async fn close(&self) -> Result<(), SyncError> {
        let mut state = self.store.state.lock();
        state.subscribers.remove(&self.id);
        state.closes += 1;
        Ok(())
    }
}

struct MemoryWorker {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl WorkerConnection for MemoryWorker {
    async fn get_version(&self, key: &str) -> Result<u64, SyncError> {
        Ok(self.store.state.lock().values.get(key).copied().unwrap_or(0))
    }

    async fn recover(
        &self,
        key: &str,
        wanted_version: u64,
        guard_key: Option<&str>,
    ) -> Result<Option<u64>, SyncError> {
        Ok(self.store.recover(key, wanted_version, guard_key))
    }
}
