use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::message::NodeId;

/// Event delivered on a node's subscriber connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The backend acknowledged a subscribe for this key.
    Subscribed(String),
    /// The backend acknowledged an unsubscribe for this key.
    Unsubscribed(String),
    /// A new version was published for `channel` (the key).
    Message { channel: String, payload: String },
}

/// Stream of notifications for one node. The backend reports a dead
/// connection either with an error item or by closing the channel.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Result<Notification, SyncError>>;
pub type NotificationSender = mpsc::UnboundedSender<Result<Notification, SyncError>>;

/// Connection dedicated to pub/sub commands for one node.
#[async_trait]
pub trait SubscriberConnection: Send + Sync {
    /// Request a subscription. The ack arrives as [`Notification::Subscribed`].
    async fn subscribe(&self, key: &str) -> Result<(), SyncError>;
    async fn unsubscribe(&self, key: &str) -> Result<(), SyncError>;

    /// Release the connection. No notifications are delivered afterwards.
    async fn close(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Regular command connection for one node.
#[async_trait]
pub trait WorkerConnection: Send + Sync {
    /// Current stored version of `key`, 0 when absent.
    async fn get_version(&self, key: &str) -> Result<u64, SyncError>;

    /// Run the recovery script. Returns the applied delta, or `None` when
    /// nothing changed (already satisfied, or guard held by another recovery).
    async fn recover(
        &self,
        key: &str,
        wanted_version: u64,
        guard_key: Option<&str>,
    ) -> Result<Option<u64>, SyncError>;
}

/// Both connections of a node plus its notification stream.
pub struct NodeConnection {
    pub subscriber: Arc<dyn SubscriberConnection>,
    pub worker: Arc<dyn WorkerConnection>,
    pub notifications: NotificationReceiver,
}

/// Opens node connections.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn connect(&self, node: NodeId, url: &str) -> Result<NodeConnection, SyncError>;
}
