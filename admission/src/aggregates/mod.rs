//! The four admission aggregates.
//!
//! Each aggregate is a reducer hosted in its own [`Store`](visitgate_runtime::store::Store):
//!
//! - [`capacity`]: per (date, category) counters
//! - [`slots`]: reservations and the duplicate check
//! - [`tickets`]: ticket numbers, redemption, single use
//! - [`queue`]: the live queue and its derived position
//!
//! Actions mix commands and events. A command is validated, turned into
//! events, the events are applied to state and then appended to the
//! aggregate's stream; notifications go to the bus. A rejected command
//! leaves state untouched and records the typed error in `last_error`.

pub mod capacity;
pub mod queue;
pub mod slots;
pub mod tickets;

use crate::error::AdmissionError;
use crate::events::{NOTIFICATION_TOPIC, VisitEvent};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use visitgate_core::event::{Event, SerializedEvent};
use visitgate_core::event_bus::EventBus;
use visitgate_core::event_store::EventStore;
use visitgate_core::stream::StreamId;
use visitgate_core::{SmallVec, append_events, effect::Effect, publish_event};

/// State that reports the outcome of the last command.
pub trait CommandOutcome {
    /// Rejection of the last command, `None` if it was accepted.
    fn last_error(&self) -> Option<&AdmissionError>;
}

/// An aggregate's stream in the event store, plus the notification bus.
#[derive(Clone)]
pub struct AggregateLog {
    /// Durable log
    pub event_store: Arc<dyn EventStore>,
    /// Notifications
    pub event_bus: Arc<dyn EventBus>,
    /// Stream owned by the aggregate
    pub stream_id: StreamId,
}

impl AggregateLog {
    /// Log writing to `stream`.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>, event_bus: Arc<dyn EventBus>, stream: &str) -> Self {
        Self {
            event_store,
            event_bus,
            stream_id: StreamId::new(stream),
        }
    }

    /// Effects that append `events` in one batch and then publish each
    /// notification.
    ///
    /// `on_failure` turns an exhausted append or publish into an action fed
    /// back to the reducer.
    pub(crate) fn record<A>(
        &self,
        events: &[A],
        notifications: Vec<VisitEvent>,
        on_failure: fn(String) -> A,
    ) -> SmallVec<[Effect<A>; 4]>
    where
        A: Event + Serialize + Send + 'static,
    {
        let serialized: Result<Vec<_>, _> = events
            .iter()
            .map(|event| SerializedEvent::from_event(event, None))
            .collect();
        let serialized = match serialized {
            Ok(serialized) => serialized,
            Err(error) => {
                tracing::error!(stream = %self.stream_id, error = %error, "Failed to serialize events");
                return SmallVec::new();
            },
        };

        let mut effects = SmallVec::new();
        effects.push(append_events! {
            store: self.event_store,
            stream: self.stream_id.as_str(),
            expected_version: None,
            events: serialized,
            on_success: |_version| None,
            on_error: |error| Some(on_failure(error.to_string()))
        });

        for notification in notifications {
            match SerializedEvent::from_event(&notification, None) {
                Ok(event) => effects.push(publish_event! {
                    bus: self.event_bus,
                    topic: NOTIFICATION_TOPIC,
                    event: event,
                    on_success: || None,
                    on_error: |error| Some(on_failure(error.to_string()))
                }),
                Err(error) => {
                    tracing::error!(event_type = notification.event_type(), error = %error, "Failed to serialize notification");
                },
            }
        }

        effects
    }

    /// Decode every event of the stream, oldest first, and hand it to `apply`.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::EventLog`] if the stream cannot be loaded or an
    /// event does not decode.
    pub async fn replay<A, F>(&self, mut apply: F) -> Result<usize, AdmissionError>
    where
        A: Event + DeserializeOwned,
        F: FnMut(&A),
    {
        let events = self
            .event_store
            .load_events(self.stream_id.clone(), None)
            .await
            .map_err(|e| AdmissionError::EventLog(e.to_string()))?;

        for serialized in &events {
            let event: A = serialized
                .decode()
                .map_err(|e| AdmissionError::EventLog(format!("{}: {e}", serialized.event_type)))?;
            apply(&event);
        }

        tracing::debug!(stream = %self.stream_id, events = events.len(), "Replayed stream");
        Ok(events.len())
    }
}
