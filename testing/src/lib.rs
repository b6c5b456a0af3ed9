//! # Visitgate Testing
//!
//! Test doubles and helpers for the visitgate crates:
//! - [`FixedClock`]: deterministic, movable time
//! - [`InMemoryEventStore`]: event log with failure injection
//! - [`InMemoryEventBus`]: records publications and serves subscriptions
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use visitgate_testing::{InMemoryEventStore, test_clock};
//!
//! #[tokio::test]
//! async fn ledger_persists_reservations() {
//!     let events = Arc::new(InMemoryEventStore::new());
//!     let store = Store::new(LedgerState::default(), LedgerReducer, env(events.clone()));
//!
//!     store.send(LedgerAction::TryReserve { reservation_id, date, category }).await?;
//!     store.settle().await;
//!
//!     assert_eq!(events.stream_len("capacity-ledger"), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use visitgate_core::environment::Clock;


/// In-memory doubles for the environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use futures::stream;
    use std::collections::HashMap;
    use std::future::{Future, ready};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError, RwLock};
    use tokio::sync::broadcast;
    use visitgate_core::event::SerializedEvent;
    use visitgate_core::event_bus::{EventBus, EventBusError, EventStream};
    use visitgate_core::event_store::{EventStore, EventStoreError};
    use visitgate_core::stream::{StreamId, Version};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same instant until moved with [`FixedClock::set`] or
    /// [`FixedClock::advance_days`]. Clones share the same time, so a test
    /// can keep one handle and give another to an environment.
    ///
    /// # Example
    ///
    /// ```
    /// use visitgate_testing::mocks::FixedClock;
    /// use visitgate_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let handle = clock.clone();
    /// let before = clock.today();
    /// handle.advance_days(1);
    /// assert_eq!(clock.today(), before.succ_opt().unwrap());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward by `duration`.
        pub fn advance(&self, duration: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += duration;
        }

        /// Move the clock forward by whole days.
        pub fn advance_days(&self, days: i64) {
            self.advance(chrono::Duration::days(days));
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC, a Wednesday)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }

    /// In-memory event store.
    ///
    /// Honors `expected_version` and can be told to fail the next appends
    /// with a transient [`EventStoreError::DatabaseError`].
    #[derive(Debug, Default)]
    pub struct InMemoryEventStore {
        streams: RwLock<HashMap<StreamId, Vec<SerializedEvent>>>,
        failures_remaining: AtomicUsize,
    }

    impl InMemoryEventStore {
        /// Create an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `count` appends.
        pub fn fail_next_appends(&self, count: usize) {
            self.failures_remaining.store(count, Ordering::SeqCst);
        }

        /// Number of events in `stream`.
        #[must_use]
        pub fn stream_len(&self, stream: &str) -> usize {
            self.streams
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&StreamId::new(stream))
                .map_or(0, Vec::len)
        }

        /// Event types appended to `stream`, oldest first.
        #[must_use]
        pub fn event_types(&self, stream: &str) -> Vec<String> {
            self.streams
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&StreamId::new(stream))
                .map(|events| events.iter().map(|e| e.event_type.clone()).collect())
                .unwrap_or_default()
        }

        fn try_fail(&self) -> bool {
            self.failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn append(
            &self,
            stream_id: StreamId,
            expected_version: Option<Version>,
            events: Vec<SerializedEvent>,
        ) -> Result<Version, EventStoreError> {
            if self.try_fail() {
                return Err(EventStoreError::DatabaseError("injected failure".to_string()));
            }

            let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
            let stream = streams.entry(stream_id.clone()).or_default();
            let actual = Version::new(stream.len() as u64);
            match expected_version {
                Some(expected) if expected != actual => {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual,
                    });
                },
                _ => {},
            }
            stream.extend(events);
            Ok(Version::new(stream.len() as u64))
        }
    }

    impl EventStore for InMemoryEventStore {
        fn append_events(
            &self,
            stream_id: StreamId,
            expected_version: Option<Version>,
            events: Vec<SerializedEvent>,
        ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
            Box::pin(ready(self.append(stream_id, expected_version, events)))
        }

        fn load_events(
            &self,
            stream_id: StreamId,
            from_version: Option<Version>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>
        {
            let skip = from_version.map_or(0, |v| usize::try_from(v.value()).unwrap_or(usize::MAX));
            let events = self
                .streams
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&stream_id)
                .map(|events| events.iter().skip(skip).cloned().collect())
                .unwrap_or_default();
            Box::pin(ready(Ok(events)))
        }
    }

    /// In-memory event bus.
    ///
    /// Keeps every publication for later assertions and forwards it to live
    /// subscribers of the topic.
    #[derive(Debug)]
    pub struct InMemoryEventBus {
        published: Mutex<Vec<(String, SerializedEvent)>>,
        sender: broadcast::Sender<(String, SerializedEvent)>,
        failures_remaining: AtomicUsize,
    }

    impl Default for InMemoryEventBus {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryEventBus {
        /// Create a bus with no subscribers.
        #[must_use]
        pub fn new() -> Self {
            let (sender, _) = broadcast::channel(256);
            Self {
                published: Mutex::new(Vec::new()),
                sender,
                failures_remaining: AtomicUsize::new(0),
            }
        }

        /// Fail the next `count` publications.
        pub fn fail_next_publishes(&self, count: usize) {
            self.failures_remaining.store(count, Ordering::SeqCst);
        }

        /// Events published to `topic`, oldest first.
        #[must_use]
        pub fn published(&self, topic: &str) -> Vec<SerializedEvent> {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, event)| event.clone())
                .collect()
        }

        /// Event types published to `topic`, oldest first.
        #[must_use]
        pub fn published_types(&self, topic: &str) -> Vec<String> {
            self.published(topic).into_iter().map(|e| e.event_type).collect()
        }
    }

    impl EventBus for InMemoryEventBus {
        fn publish(
            &self,
            topic: &str,
            event: &SerializedEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            let failed = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Box::pin(ready(Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected failure".to_string(),
                })));
            }

            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((topic.to_string(), event.clone()));
            // No live subscribers is not an error.
            let _ = self.sender.send((topic.to_string(), event.clone()));
            Box::pin(ready(Ok(())))
        }

        fn subscribe(
            &self,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
            let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
            let receiver = self.sender.subscribe();

            let events = stream::unfold((receiver, topics), |(mut receiver, topics)| async move {
                loop {
                    match receiver.recv().await {
                        Ok((topic, event)) if topics.contains(&topic) => {
                            return Some((Ok(event), (receiver, topics)));
                        },
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            });

            let events: EventStream = Box::pin(events);
            Box::pin(ready(Ok(events)))
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, InMemoryEventBus, InMemoryEventStore, test_clock};
pub use reducer_test::{ReducerTest, assertions};
