//! Version-gated callbacks.
//!
//! A message waits on its dependencies one at a time. [`DependencyWait`] is
//! that state: the message plus the index of the dependency currently waited
//! on. A [`Callback`] parks a wait in a key's queue until the key reaches the
//! required version.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::message::{Dependency, Message};

/// A message part-way through its dependency list.
pub struct DependencyWait<M> {
    message: Arc<M>,
    index: usize,
}

impl<M: Message> DependencyWait<M> {
    /// Start waiting on the first dependency.
    pub fn new(message: Arc<M>) -> Self {
        Self { message, index: 0 }
    }

    pub fn message(&self) -> &Arc<M> {
        &self.message
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Dependency currently waited on, `None` once all are satisfied.
    pub fn dependency(&self) -> Option<&Dependency> {
        self.message.happens_before_dependencies().get(self.index)
    }

    /// Move on to the next dependency.
    #[must_use]
    pub fn advance(self) -> Self {
        Self { message: self.message, index: self.index + 1 }
    }

    pub fn into_message(self) -> Arc<M> {
        self.message
    }
}

/// A wait parked until a key reaches `required_version`.
///
/// Ordered so that a [`std::collections::BinaryHeap`] pops the lowest
/// required version first, and the earliest registered among equals.
pub struct Callback<M> {
    required_version: u64,
    pub(super) seq: u64,
    wait: DependencyWait<M>,
}

impl<M: Message> Callback<M> {
    pub fn new(required_version: u64, wait: DependencyWait<M>) -> Self {
        Self { required_version, seq: 0, wait }
    }

    pub fn required_version(&self) -> u64 {
        self.required_version
    }

    pub fn can_perform(&self, current_version: u64) -> bool {
        current_version >= self.required_version
    }

    /// The message this callback releases.
    pub fn message(&self) -> &Arc<M> {
        self.wait.message()
    }

    pub fn into_wait(self) -> DependencyWait<M> {
        self.wait
    }
}

impl<M> PartialEq for Callback<M> {
    fn eq(&self, other: &Self) -> bool {
        self.required_version == other.required_version && self.seq == other.seq
    }
}

impl<M> Eq for Callback<M> {}

impl<M> PartialOrd for Callback<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for Callback<M> {
    // Reversed: BinaryHeap is a max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .required_version
            .cmp(&self.required_version)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
