// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error type shared by the synchronizer and its backends.

use thiserror::Error;

use crate::message::NodeId;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A node's subscriber connection went away while we were not stopping it.
    #[error("Lost connection to {node}: {cause}")]
    ConnectionLost { node: NodeId, cause: String },

    /// Connection-level failure reported by the backend (refused, reset, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unexpected reply or payload from the backend.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Synchronizer is not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SyncError {
    /// Whether this error means the connection is gone and a reconnect is needed.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. } | Self::Connection(_))
    }

    /// Wrap any error as a lost connection on `node`, keeping an existing wrap as is.
    #[must_use]
    pub fn lost_connection(node: NodeId, cause: SyncError) -> Self {
        match cause {
            Self::ConnectionLost { .. } => cause,
            other => Self::ConnectionLost { node, cause: other.to_string() },
        }
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_io_error()
            || err.is_timeout()
        {
            Self::Connection(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(SyncError::Connection("reset".into()).is_connection_loss());
        assert!(SyncError::ConnectionLost { node: NodeId(0), cause: "eof".into() }.is_connection_loss());
        assert!(!SyncError::Protocol("bad reply".into()).is_connection_loss());
        assert!(!SyncError::NotConnected.is_connection_loss());
    }

    #[test]
    fn test_lost_connection_wraps_once() {
        let wrapped = SyncError::lost_connection(NodeId(1), SyncError::Connection("reset".into()));
        assert_eq!(
            wrapped.to_string(),
            "Lost connection to node-1: Connection error: reset"
        );

        let rewrapped = SyncError::lost_connection(NodeId(2), wrapped.clone());
        assert_eq!(rewrapped, wrapped);
    }

    #[test]
    fn test_redis_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: SyncError = redis::RedisError::from(io).into();
        assert!(err.is_connection_loss());
    }
}
