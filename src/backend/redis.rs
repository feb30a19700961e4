//! Redis backend.
//!
//! Each node gets two connections to the same server:
//! - a **subscriber** (`SUBSCRIBE`/`UNSUBSCRIBE`), split into a command sink and a
//!   message stream; a forwarder task pumps the stream into the node's channel
//! - a **worker** [`ConnectionManager`] for `GET` and the recovery script
//!
//! Versions are stored as integer strings under the key itself and published
//! on a channel named after the key:
//! ```text
//! SET order:42 7
//! PUBLISH order:42 7
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, PubSubSink};
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::script::RecoveryScript;
use super::traits::{
    Backend, NodeConnection, Notification, NotificationSender, SubscriberConnection,
    WorkerConnection,
};
use crate::config::SynchronizerConfig;
use crate::error::SyncError;
use crate::message::NodeId;
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisBackend {
    recovery: Arc<RecoveryScript>,
    retry: RetryConfig,
}

impl RedisBackend {
    #[must_use]
    pub fn new(config: &SynchronizerConfig) -> Self {
        let mut retry = RetryConfig::startup();
        retry.max_retries = Some(config.connect_retries.max(1));
        Self {
            recovery: Arc::new(RecoveryScript::new(config.recovery_guard_ttl())),
            retry,
        }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn connect(&self, node: NodeId, url: &str) -> Result<NodeConnection, SyncError> {
        let client = Client::open(url).map_err(|e| SyncError::Backend(e.to_string()))?;

        let pubsub = retry("redis_subscriber_connect", &self.retry, || {
            let client = client.clone();
            async move { client.get_async_pubsub().await }
        })
        .await?;

        let mut worker = retry("redis_worker_connect", &self.retry, || {
            let client = client.clone();
            async move { ConnectionManager::new(client).await }
        })
        .await?;
        self.recovery.register(&mut worker).await?;

        let (sink, mut stream) = pubsub.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let forward = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let notification = msg
                    .get_payload::<String>()
                    .map(|payload| Notification::Message {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    })
                    .map_err(|e| SyncError::Protocol(format!("unreadable payload: {}", e)));
                if forward.send(notification).is_err() {
                    return;
                }
            }
            let _ = forward.send(Err(SyncError::ConnectionLost {
                node,
                cause: "subscriber stream closed".to_string(),
            }));
        });

        info!(node = %node, url = %url, "Redis node connected");
        Ok(NodeConnection {
            subscriber: Arc::new(RedisSubscriber {
                sink: Mutex::new(Some(sink)),
                acks: tx,
                forwarder: Mutex::new(Some(forwarder)),
            }),
            worker: Arc::new(RedisWorker {
                conn: worker,
                recovery: self.recovery.clone(),
            }),
            notifications: rx,
        })
    }
}

struct RedisSubscriber {
    /// Taken on close. Dropping it with the stream closes the connection.
    sink: Mutex<Option<PubSubSink>>,
    /// Acks are reported on the same channel as messages, after the server confirmed.
    acks: NotificationSender,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl RedisSubscriber {
    fn sink(&self) -> Result<PubSubSink, SyncError> {
        self.sink
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Connection("subscriber connection closed".to_string()))
    }
}

#[async_trait]
impl SubscriberConnection for RedisSubscriber {
    async fn subscribe(&self, key: &str) -> Result<(), SyncError> {
        let mut sink = self.sink()?;
        sink.subscribe(key).await?;
        let _ = self.acks.send(Ok(Notification::Subscribed(key.to_string())));
        Ok(())
    }

    async fn unsubscribe(&self, key: &str) -> Result<(), SyncError> {
        let mut sink = self.sink()?;
        sink.unsubscribe(key).await?;
        let _ = self.acks.send(Ok(Notification::Unsubscribed(key.to_string())));
        Ok(())
    }

    async fn close(&self) -> Result<(), SyncError> {
        let sink = self.sink.lock().take();
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
        if sink.is_some() {
            debug!("Redis subscriber closed");
        }
        Ok(())
    }
}

impl Drop for RedisSubscriber {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.get_mut().take() {
            forwarder.abort();
        }
    }
}

struct RedisWorker {
    conn: ConnectionManager,
    recovery: Arc<RecoveryScript>,
}

#[async_trait]
impl WorkerConnection for RedisWorker {
    async fn get_version(&self, key: &str) -> Result<u64, SyncError> {
        let mut conn = self.conn.clone();
        let version: Option<u64> = conn.get(key).await?;
        Ok(version.unwrap_or(0))
    }

    async fn recover(
        &self,
        key: &str,
        wanted_version: u64,
        guard_key: Option<&str>,
    ) -> Result<Option<u64>, SyncError> {
        let mut conn = self.conn.clone();
        self.recovery.run(&mut conn, key, wanted_version, guard_key).await
    }
}
