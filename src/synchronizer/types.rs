//! Public types for the message synchronizer.

/// Synchronizer lifecycle state.
///
/// Use [`super::MessageSynchronizer::state()`] to check the current state or
/// [`super::MessageSynchronizer::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizerState {
    /// Built, never connected
    Created,
    /// Opening node connections
    Connecting,
    /// All nodes connected, messages are synchronized
    Connected,
    /// A node connection was lost; the reconnect timer is running
    Reconnecting,
    /// Disconnected on request, messages with dependencies are dropped
    Disconnected,
    /// Shut down for good
    ShutDown,
}

impl std::fmt::Display for SynchronizerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::ShutDown => write!(f, "ShutDown"),
        }
    }
}

/// Point-in-time snapshot from [`super::MessageSynchronizer::stats()`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynchronizerStats {
    pub connected: bool,
    /// Connected nodes
    pub nodes: usize,
    /// Live key subscriptions across all nodes
    pub subscriptions: usize,
    /// Messages with dependencies still waiting
    pub queued_messages: u64,
    /// Messages with dependencies handed to the execution queue since connect
    pub processed_messages: u64,
}

/// A key whose version was forced forward by recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredDependency {
    pub key: String,
    /// Version the key was raised to
    pub version: u64,
    /// How far it moved
    pub delta: u64,
}

impl std::fmt::Display for RecoveredDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} +{}", self.key, self.delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SynchronizerState::Reconnecting.to_string(), "Reconnecting");
        assert_eq!(SynchronizerState::ShutDown.to_string(), "ShutDown");
    }

    #[test]
    fn test_recovered_display() {
        let recovered = RecoveredDependency { key: "orders:7".into(), version: 12, delta: 3 };
        assert_eq!(recovered.to_string(), "orders:7 +3");
    }
}
