//! Ordering and identity types for vigil.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The pair of sequence numbers delivered with every message from a
/// durable consumer.
///
/// `stream_sequence` is the position the broker assigned at append time;
/// `consumer_sequence` is the position within this consumer's delivery
/// order. A healthy durable consumer with no gaps, no redelivery, and a
/// single reader advances both by exactly one per acknowledged message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SequencePair {
    /// Position in the stream, assigned at append time. Starts at 1.
    pub stream_sequence: u64,
    /// Position in this consumer's delivery order. Starts at 1.
    pub consumer_sequence: u64,
}

impl SequencePair {
    /// Create a pair from explicit components.
    pub fn new(stream_sequence: u64, consumer_sequence: u64) -> Self {
        Self {
            stream_sequence,
            consumer_sequence,
        }
    }

    /// The pair before any message has been delivered.
    pub fn zero() -> Self {
        Self::default()
    }

    /// The pair one delivery later on both components.
    pub fn next(&self) -> Self {
        Self {
            stream_sequence: self.stream_sequence.saturating_add(1),
            consumer_sequence: self.consumer_sequence.saturating_add(1),
        }
    }

    /// True when both components advanced by exactly one relative to `prev`.
    ///
    /// Any skip or regression on either component makes this false.
    pub fn is_successor_of(&self, prev: &SequencePair) -> bool {
        self.stream_sequence == prev.stream_sequence.wrapping_add(1)
            && self.consumer_sequence == prev.consumer_sequence.wrapping_add(1)
    }
}

impl fmt::Display for SequencePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.stream_sequence, self.consumer_sequence)
    }
}

impl fmt::Debug for SequencePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SequencePair({}, {})",
            self.stream_sequence, self.consumer_sequence
        )
    }
}

/// The revision of a key-value entry.
///
/// Assigned by the broker, strictly increasing across successful writes
/// to the same key. Conditional updates name the revision they observed;
/// the broker rejects the write if the key has moved on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Revision(u64);

impl Revision {
    /// Create a Revision with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Revision.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Increment the revision by one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}

/// Identity of a spawned scenario worker, used to key report tallies.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(u32);

impl WorkerId {
    /// Create a WorkerId with the given index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the numeric index of this worker.
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}
