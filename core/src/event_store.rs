//! Event store trait: the durable log behind every admission aggregate.
//!
//! Each aggregate appends its events to one stream (`capacity-ledger`,
//! `slot-allocator`, `credential-issuer`, `queue-manager`). On startup the
//! application replays those streams to rebuild in-memory state.
//!
//! # Example
//!
//! ```no_run
//! use visitgate_core::event_store::{EventStore, EventStoreError};
//! use visitgate_core::stream::StreamId;
//!
//! async fn replay<E: EventStore>(store: &E) -> Result<usize, EventStoreError> {
//!     let events = store.load_events(StreamId::new("capacity-ledger"), None).await?;
//!     Ok(events.len())
//! }
//! ```

use crate::event::SerializedEvent;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: the stream moved since it was read.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream ID where the conflict occurred.
        stream_id: StreamId,
        /// The version we expected the stream to be at.
        expected: Version,
        /// The actual current version of the stream.
        actual: Version,
    },

    /// Database connection error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EventStoreError {
    /// Whether retrying the same append can succeed.
    ///
    /// A conflict repeats for the same expected version and a payload that
    /// failed to encode fails again, so only backend errors qualify.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError(_))
    }
}

/// Append-only event log.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be held as
/// `Arc<dyn EventStore>` inside effects.
pub trait EventStore: Send + Sync {
    /// Append events to a stream.
    ///
    /// `expected_version` of `Some(v)` asserts the stream is at `v`;
    /// `None` appends unconditionally. Returns the version after the append.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stream is not at `expected_version`
    /// - `DatabaseError`: the backing store failed
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>>;

    /// Load events from a stream, oldest first.
    ///
    /// `from_version` of `Some(v)` skips the first `v` events. A stream
    /// that was never written is empty, not an error.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backing store failed
    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::new("credential-issuer"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = error.to_string();
        assert!(display.contains("credential-issuer"));
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
        assert!(!error.is_transient());
    }

    #[test]
    fn only_database_errors_are_transient() {
        assert!(!EventStoreError::SerializationError("bad".to_string()).is_transient());
        assert!(EventStoreError::DatabaseError("timeout".to_string()).is_transient());
    }
}
