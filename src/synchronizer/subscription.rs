//! Per-key subscription and wait queue.
//!
//! A [`KeySubscription`] tracks the last version seen for one key on one node
//! and holds the callbacks waiting for that key to move forward.
//!
//! # Missed wakeups
//!
//! A version notification can race with a callback being registered. Both
//! [`KeySubscription::signal_version`] and [`KeySubscription::add_callback`]
//! read and write `last_version` under the same lock, so either the signal
//! sees the callback in the queue or the callback sees the new version.
//!
//! Callbacks are popped under the lock but returned to the caller to run,
//! since running one may touch this same subscription again.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::callback::Callback;
use crate::backend::{SubscriberConnection, WorkerConnection};
use crate::error::SyncError;
use crate::message::Message;

/// Outcome of registering a callback.
pub enum Enqueued<M> {
    /// Requirement already met; the caller runs it now.
    Ready(Callback<M>),
    /// Parked until the key reaches the required version.
    Queued,
}

impl<M> Enqueued<M> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

struct SubscriptionState<M> {
    last_version: u64,
    pending: BinaryHeap<Callback<M>>,
    next_seq: u64,
}

impl<M: Message> SubscriptionState<M> {
    fn pop_ready(&mut self) -> Option<Callback<M>> {
        if self.pending.peek()?.can_perform(self.last_version) {
            self.pending.pop()
        } else {
            None
        }
    }
}

pub struct KeySubscription<M> {
    key: String,
    subscribe_requested: AtomicBool,
    unsubscribed: AtomicBool,
    /// Processed-message count at last activity.
    last_activity: AtomicU64,
    state: Mutex<SubscriptionState<M>>,
}

impl<M: Message> KeySubscription<M> {
    pub fn new(key: impl Into<String>, activity_marker: u64) -> Self {
        Self {
            key: key.into(),
            subscribe_requested: AtomicBool::new(false),
            unsubscribed: AtomicBool::new(false),
            last_activity: AtomicU64::new(activity_marker),
            state: Mutex::new(SubscriptionState {
                last_version: 0,
                pending: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Send the subscribe request, once per subscription.
    ///
    /// The flag is set before the request goes out so concurrent callers never
    /// send twice. A failed request clears it again.
    pub async fn subscribe(&self, conn: &dyn SubscriberConnection) -> Result<(), SyncError> {
        if self.subscribe_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(key = %self.key, "Subscribing");
        if let Err(e) = conn.subscribe(&self.key).await {
            self.subscribe_requested.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    pub fn is_subscribe_requested(&self) -> bool {
        self.subscribe_requested.load(Ordering::SeqCst)
    }

    /// Send the unsubscribe request, once per subscription.
    pub async fn unsubscribe(&self, conn: &dyn SubscriberConnection) -> Result<(), SyncError> {
        if self.unsubscribed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(key = %self.key, "Unsubscribing stale key");
        conn.unsubscribe(&self.key).await
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    /// Called once the backend acked the subscribe: read the current value so
    /// an update that landed before the ack is not missed. Anything after the
    /// ack arrives as a notification.
    pub async fn finalize_subscription(
        &self,
        worker: &dyn WorkerConnection,
    ) -> Result<Vec<Callback<M>>, SyncError> {
        let version = worker.get_version(&self.key).await?;
        trace!(key = %self.key, version, "Subscription finalized");
        Ok(self.signal_version(version))
    }

    /// Record a new version and pop every callback it satisfies, lowest
    /// required version first. Older versions than the last seen are ignored.
    pub fn signal_version(&self, new_version: u64) -> Vec<Callback<M>> {
        let mut state = self.state.lock();
        if new_version < state.last_version {
            trace!(key = %self.key, new_version, last_version = state.last_version, "Ignoring stale version");
            return Vec::new();
        }
        state.last_version = new_version;

        let mut released = Vec::new();
        while let Some(callback) = state.pop_ready() {
            released.push(callback);
        }
        released
    }

    /// Register a callback. Returns it back when it can run right away.
    pub fn add_callback(&self, mut callback: Callback<M>, activity_marker: u64) -> Enqueued<M> {
        self.touch(activity_marker);

        let mut state = self.state.lock();
        if callback.can_perform(state.last_version) {
            return Enqueued::Ready(callback);
        }
        callback.seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(callback);
        Enqueued::Queued
    }

    pub fn touch(&self, activity_marker: u64) {
        self.last_activity.fetch_max(activity_marker, Ordering::SeqCst);
    }

    pub fn last_version(&self) -> u64 {
        self.state.lock().last_version
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Message of the callback that will be released next.
    pub fn head_message(&self) -> Option<Arc<M>> {
        self.state.lock().pending.peek().map(|cb| cb.message().clone())
    }

    /// Stale: nothing waiting and at least `max_age` messages processed since
    /// the last activity.
    pub fn is_old(&self, processed: u64, max_age: u64) -> bool {
        let idle = processed.saturating_sub(self.last_activity.load(Ordering::SeqCst));
        idle >= max_age && self.state.lock().pending.is_empty()
    }
}
