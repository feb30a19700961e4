// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborators around the synchronizer: where released messages go,
//! who redelivers unacked messages, and who hears about errors.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::SyncError;

/// Downstream queue that executes released messages.
pub trait ExecutionQueue<M>: Send + Sync {
    fn push(&self, message: Arc<M>);
}

impl<M: Send + Sync> ExecutionQueue<M> for mpsc::UnboundedSender<Arc<M>> {
    fn push(&self, message: Arc<M>) {
        if self.send(message).is_err() {
            warn!("Execution queue receiver dropped, released message discarded");
        }
    }
}

/// Inbound message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask the broker to redeliver every unacked message.
    ///
    /// Called after each successful connect, since waits abandoned by a
    /// disconnect are only restored through redelivery.
    async fn recover(&self) -> Result<(), SyncError>;
}

/// Transport with nothing to redeliver.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn recover(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Sink for lost-connection, protocol and recovery errors.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, error: &SyncError);
}

impl<F> ErrorNotifier for F
where
    F: Fn(&SyncError) + Send + Sync,
{
    fn notify(&self, error: &SyncError) {
        self(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_unbounded_sender_is_a_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<u32>>();
        tx.push(Arc::new(7));
        assert_eq!(*rx.recv().await.unwrap(), 7);
    }

    #[test]
    fn test_push_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel::<Arc<u32>>();
        drop(rx);
        tx.push(Arc::new(1));
    }

    #[test]
    fn test_closure_notifier() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let notifier = move |e: &SyncError| sink.lock().push(e.to_string());
        notifier.notify(&SyncError::NotConnected);
        assert_eq!(seen.lock().as_slice(), ["Synchronizer is not connected"]);
    }
}
