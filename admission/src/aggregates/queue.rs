//! Queue manager: the live, same-day queue.
//!
//! Position is never stored. It is recomputed from each entry's
//! [`JoinOrder`] on every query, so joins and removals never renumber other
//! entries.
//!
//! ```text
//! Waiting ──call──▶ Called ──serve──▶ Served ──complete──▶ Completed
//!    │                │
//!    └────cancel──────┴──────────▶ Cancelled (left, no-show, staff)
//! ```

use super::{AggregateLog, CommandOutcome};
use crate::config::Config;
use crate::error::AdmissionError;
use crate::events::VisitEvent;
use crate::types::{
    CancelReason, Category, EntryId, JoinOrder, QueueEntry, QueuePriority, QueueStatus, ReservationId, TicketNumber,
};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use visitgate_core::environment::Clock;
use visitgate_core::event::Event;
use visitgate_core::{SmallVec, effect::Effect, reducer::Reducer};
use visitgate_runtime::store::Store;

/// Stream holding every queue event.
pub const STREAM: &str = "queue-manager";

/// Store hosting the queue.
pub type QueueStore = Store<QueueState, QueueAction, QueueEnvironment, QueueReducer>;

/// Every entry ever created, plus service-time samples.
#[derive(Clone, Debug)]
pub struct QueueState {
    entries: HashMap<EntryId, QueueEntry>,
    /// Open entry per ticket
    open_by_ticket: HashMap<TicketNumber, EntryId>,
    next_sequence: u64,
    /// Recent service times per category, newest last
    service_samples: HashMap<Category, VecDeque<TimeDelta>>,
    sample_window: usize,
    now_serving: HashMap<Category, EntryId>,
    /// Entry picked by the last `CallNext`, `None` if the queue was empty
    pub last_called: Option<EntryId>,
    /// Rejection of the last command
    pub last_error: Option<AdmissionError>,
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new(20)
    }
}

impl QueueState {
    /// Empty queue keeping `sample_window` service times per category.
    #[must_use]
    pub fn new(sample_window: usize) -> Self {
        Self {
            entries: HashMap::new(),
            open_by_ticket: HashMap::new(),
            next_sequence: 0,
            service_samples: HashMap::new(),
            sample_window: sample_window.max(1),
            now_serving: HashMap::new(),
            last_called: None,
            last_error: None,
        }
    }

    /// Entry by id.
    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&QueueEntry> {
        self.entries.get(&id)
    }

    /// Open entry for `ticket`, if any.
    #[must_use]
    pub fn open_entry_for(&self, ticket: &TicketNumber) -> Option<&QueueEntry> {
        self.open_by_ticket.get(ticket).and_then(|id| self.entries.get(id))
    }

    /// Waiting entries of `category` on `date`, in call order.
    #[must_use]
    pub fn waiting_entries(&self, category: &Category, date: NaiveDate) -> Vec<QueueEntry> {
        let mut waiting: Vec<QueueEntry> = self
            .entries
            .values()
            .filter(|e| e.status == QueueStatus::Waiting && &e.category == category && e.service_date == date)
            .cloned()
            .collect();
        waiting.sort_by_key(|e| (e.priority, e.join_order));
        waiting
    }

    /// Number of waiting entries across categories and days.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == QueueStatus::Waiting)
            .count()
    }

    /// Entries of `date` cancelled as no-shows.
    #[must_use]
    pub fn no_shows(&self, date: NaiveDate) -> usize {
        self.entries
            .values()
            .filter(|e| e.service_date == date && e.cancel_reason == Some(CancelReason::NoShow))
            .count()
    }

    /// Most recently called entry of `category`.
    #[must_use]
    pub fn now_serving(&self, category: &Category) -> Option<&QueueEntry> {
        self.now_serving.get(category).and_then(|id| self.entries.get(id))
    }

    /// 1-based position among waiting entries of the same category that
    /// joined earlier, leftovers from earlier days included.
    ///
    /// Position follows join order only, so an entry never drops behind a
    /// later arrival. `CallNext` still serves priority entries first; the
    /// wait estimate accounts for that, position does not.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::EntryNotFound`] or, for entries no longer waiting,
    /// [`AdmissionError::NotWaiting`].
    pub fn position(&self, id: EntryId) -> Result<usize, AdmissionError> {
        let entry = self.entries.get(&id).ok_or(AdmissionError::EntryNotFound(id))?;
        if entry.status != QueueStatus::Waiting {
            return Err(AdmissionError::NotWaiting {
                status: entry.status.as_str(),
            });
        }

        let ahead = self
            .entries
            .values()
            .filter(|other| {
                other.status == QueueStatus::Waiting
                    && other.category == entry.category
                    && other.join_order < entry.join_order
            })
            .count();
        Ok(ahead + 1)
    }

    /// Waiting entries `CallNext` would serve before `entry`.
    fn ahead_in_call_order(&self, entry: &QueueEntry) -> usize {
        let key = (entry.priority, entry.join_order);
        self.entries
            .values()
            .filter(|other| {
                other.status == QueueStatus::Waiting
                    && other.category == entry.category
                    && (other.priority, other.join_order) < key
            })
            .count()
    }

    /// Average of the recorded service times for `category`.
    #[must_use]
    pub fn rolling_service_time(&self, category: &Category) -> Option<Duration> {
        let samples = self.service_samples.get(category)?;
        if samples.is_empty() {
            return None;
        }
        let total = samples.iter().fold(TimeDelta::zero(), |acc, sample| acc + *sample);
        let count = i32::try_from(samples.len()).ok()?;
        (total / count).to_std().ok()
    }

    /// Entries called before this one times the average service time of
    /// the category.
    ///
    /// Falls back to the configured service time when no samples exist.
    ///
    /// # Errors
    ///
    /// Same as [`QueueState::position`], plus
    /// [`AdmissionError::UnknownCategory`].
    pub fn estimated_wait(&self, id: EntryId, config: &Config) -> Result<Duration, AdmissionError> {
        self.position(id)?;
        let entry = self.entries.get(&id).ok_or(AdmissionError::EntryNotFound(id))?;
        let category = &entry.category;
        let per_visitor = match self.rolling_service_time(category) {
            Some(average) => average,
            None => config
                .category(category)
                .ok_or_else(|| AdmissionError::UnknownCategory(category.clone()))?
                .average_service_time(),
        };
        let ahead = u32::try_from(self.ahead_in_call_order(entry)).unwrap_or(u32::MAX);
        Ok(per_visitor.saturating_mul(ahead))
    }

    fn next_to_call(&self, category: &Category) -> Option<EntryId> {
        self.entries
            .values()
            .filter(|e| e.status == QueueStatus::Waiting && &e.category == category)
            .min_by_key(|e| (e.priority, e.join_order))
            .map(|e| e.id)
    }

    fn record_service_time(&mut self, category: &Category, sample: TimeDelta) {
        let window = self.sample_window;
        let samples = self.service_samples.entry(category.clone()).or_default();
        samples.push_back(sample);
        while samples.len() > window {
            samples.pop_front();
        }
    }
}

impl CommandOutcome for QueueState {
    fn last_error(&self) -> Option<&AdmissionError> {
        self.last_error.as_ref()
    }
}

/// Commands and events of the queue manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueAction {
    // Commands
    /// Add a redeemed ticket to the queue
    Enqueue {
        /// Id for the new entry
        entry_id: EntryId,
        /// Redeemed ticket
        ticket_number: TicketNumber,
        /// Reservation behind the ticket
        reservation_id: ReservationId,
        /// Category
        category: Category,
        /// Day of service
        service_date: NaiveDate,
        /// Tier
        priority: QueuePriority,
    },
    /// Call the next waiting entry of a category, if any
    CallNext {
        /// Category
        category: Category,
    },
    /// Start serving a called entry
    MarkServed {
        /// Entry
        entry_id: EntryId,
    },
    /// Finish serving an entry
    MarkCompleted {
        /// Entry
        entry_id: EntryId,
    },
    /// Remove a waiting or called entry
    Cancel {
        /// Entry
        entry_id: EntryId,
        /// Why
        reason: CancelReason,
    },
    /// Cancel every open entry of a day as no-show
    CloseDay {
        /// Day
        date: NaiveDate,
    },

    // Events
    /// Entry joined
    Joined {
        /// The new entry
        entry: QueueEntry,
    },
    /// Entry called
    Called {
        /// Entry
        entry_id: EntryId,
        /// When
        called_at: DateTime<Utc>,
    },
    /// Service started
    Served {
        /// Entry
        entry_id: EntryId,
        /// When
        served_at: DateTime<Utc>,
    },
    /// Service finished
    Completed {
        /// Entry
        entry_id: EntryId,
        /// When
        completed_at: DateTime<Utc>,
    },
    /// Entry left early
    Cancelled {
        /// Entry
        entry_id: EntryId,
        /// Why
        reason: CancelReason,
        /// When
        cancelled_at: DateTime<Utc>,
    },
    /// Persisting or publishing failed after retries
    PersistenceFailed {
        /// Error message
        error: String,
    },
}

impl Event for QueueAction {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue { .. }
            | Self::CallNext { .. }
            | Self::MarkServed { .. }
            | Self::MarkCompleted { .. }
            | Self::Cancel { .. }
            | Self::CloseDay { .. } => "QueueCommand",
            Self::Joined { .. } => "QueueJoined.v1",
            Self::Called { .. } => "QueueCalled.v1",
            Self::Served { .. } => "QueueServed.v1",
            Self::Completed { .. } => "QueueCompleted.v1",
            Self::Cancelled { .. } => "QueueCancelled.v1",
            Self::PersistenceFailed { .. } => "QueuePersistenceFailed",
        }
    }
}

/// Dependencies of the queue reducer.
#[derive(Clone)]
pub struct QueueEnvironment {
    /// Category rules
    pub config: Arc<Config>,
    /// Join and transition times
    pub clock: Arc<dyn Clock>,
    /// Event stream and notifications
    pub log: AggregateLog,
}

impl QueueEnvironment {
    /// Creates a new `QueueEnvironment`
    #[must_use]
    pub fn new(config: Arc<Config>, clock: Arc<dyn Clock>, log: AggregateLog) -> Self {
        Self { config, clock, log }
    }
}

/// Reducer for the queue manager.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueReducer;

impl QueueReducer {
    /// Creates a new `QueueReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The entry, if it exists and is in one of `allowed`.
    fn require(
        state: &QueueState,
        id: EntryId,
        allowed: &[QueueStatus],
        to: QueueStatus,
    ) -> Result<QueueEntry, AdmissionError> {
        let entry = state.entry(id).ok_or(AdmissionError::EntryNotFound(id))?;
        if !allowed.contains(&entry.status) {
            return Err(AdmissionError::InvalidStateTransition {
                entity: "queue entry",
                from: entry.status.as_str(),
                to: to.as_str(),
            });
        }
        Ok(entry.clone())
    }

    /// Apply an event to state. Commands are ignored.
    pub fn apply_event(state: &mut QueueState, action: &QueueAction) {
        match action {
            QueueAction::Joined { entry } => {
                state.next_sequence = state.next_sequence.max(entry.join_order.sequence + 1);
                state.open_by_ticket.insert(entry.ticket_number.clone(), entry.id);
                state.entries.insert(entry.id, entry.clone());
            },
            QueueAction::Called { entry_id, called_at } => {
                if let Some(entry) = state.entries.get_mut(entry_id) {
                    entry.status = QueueStatus::Called;
                    entry.called_at = Some(*called_at);
                    state.now_serving.insert(entry.category.clone(), *entry_id);
                }
                state.last_called = Some(*entry_id);
            },
            QueueAction::Served { entry_id, served_at } => {
                if let Some(entry) = state.entries.get_mut(entry_id) {
                    entry.status = QueueStatus::Served;
                    entry.served_at = Some(*served_at);
                    state.open_by_ticket.remove(&entry.ticket_number);
                }
            },
            QueueAction::Completed { entry_id, completed_at } => {
                let mut sample = None;
                if let Some(entry) = state.entries.get_mut(entry_id) {
                    entry.status = QueueStatus::Completed;
                    entry.completed_at = Some(*completed_at);
                    if let Some(served_at) = entry.served_at {
                        sample = Some((entry.category.clone(), *completed_at - served_at));
                    }
                }
                if let Some((category, duration)) = sample {
                    state.record_service_time(&category, duration);
                }
            },
            QueueAction::Cancelled {
                entry_id,
                reason,
                cancelled_at,
            } => {
                if let Some(entry) = state.entries.get_mut(entry_id) {
                    entry.status = QueueStatus::Cancelled;
                    entry.cancelled_at = Some(*cancelled_at);
                    entry.cancel_reason = Some(reason.clone());
                    state.open_by_ticket.remove(&entry.ticket_number);
                }
            },
            QueueAction::Enqueue { .. }
            | QueueAction::CallNext { .. }
            | QueueAction::MarkServed { .. }
            | QueueAction::MarkCompleted { .. }
            | QueueAction::Cancel { .. }
            | QueueAction::CloseDay { .. }
            | QueueAction::PersistenceFailed { .. } => {},
        }
    }

    fn reject(state: &mut QueueState, error: AdmissionError) -> SmallVec<[Effect<QueueAction>; 4]> {
        tracing::debug!(error = %error, "Queue command rejected");
        state.last_error = Some(error);
        SmallVec::new()
    }

    fn commit(
        state: &mut QueueState,
        env: &QueueEnvironment,
        events: Vec<QueueAction>,
        notifications: Vec<VisitEvent>,
    ) -> SmallVec<[Effect<QueueAction>; 4]> {
        for event in &events {
            Self::apply_event(state, event);
        }
        env.log
            .record(&events, notifications, |error| QueueAction::PersistenceFailed { error })
    }

    fn cancellation(entry: &QueueEntry, reason: CancelReason, now: DateTime<Utc>) -> (QueueAction, VisitEvent) {
        (
            QueueAction::Cancelled {
                entry_id: entry.id,
                reason: reason.clone(),
                cancelled_at: now,
            },
            VisitEvent::Cancelled {
                entry_id: entry.id,
                ticket_number: entry.ticket_number.clone(),
                reason,
            },
        )
    }
}

impl Reducer for QueueReducer {
    type State = QueueState;
    type Action = QueueAction;
    type Environment = QueueEnvironment;

    #[allow(clippy::too_many_lines)] // one arm per command
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            QueueAction::Enqueue {
                entry_id,
                ticket_number,
                reservation_id,
                category,
                service_date,
                priority,
            } => {
                state.last_error = None;
                if state.open_by_ticket.contains_key(&ticket_number) {
                    return Self::reject(state, AdmissionError::AlreadyQueued(ticket_number));
                }

                let entry = QueueEntry {
                    id: entry_id,
                    ticket_number,
                    reservation_id,
                    category,
                    service_date,
                    priority,
                    join_order: JoinOrder {
                        joined_at: env.clock.now(),
                        sequence: state.next_sequence,
                    },
                    called_at: None,
                    served_at: None,
                    completed_at: None,
                    cancelled_at: None,
                    cancel_reason: None,
                    status: QueueStatus::Waiting,
                };
                tracing::info!(%entry_id, ticket_number = %entry.ticket_number, category = %entry.category, "Visitor joined the queue");
                Self::commit(state, env, vec![QueueAction::Joined { entry }], Vec::new())
            },

            QueueAction::CallNext { category } => {
                state.last_error = None;
                state.last_called = None;
                let Some(entry_id) = state.next_to_call(&category) else {
                    tracing::debug!(%category, "Nobody waiting");
                    return SmallVec::new();
                };
                let Some(entry) = state.entry(entry_id).cloned() else {
                    return SmallVec::new();
                };

                tracing::info!(%entry_id, ticket_number = %entry.ticket_number, %category, "Calling next visitor");
                let notification = VisitEvent::Called {
                    entry_id,
                    ticket_number: entry.ticket_number,
                    category,
                };
                Self::commit(
                    state,
                    env,
                    vec![QueueAction::Called {
                        entry_id,
                        called_at: env.clock.now(),
                    }],
                    vec![notification],
                )
            },

            QueueAction::MarkServed { entry_id } => {
                state.last_error = None;
                match Self::require(state, entry_id, &[QueueStatus::Called], QueueStatus::Served) {
                    Ok(entry) => Self::commit(
                        state,
                        env,
                        vec![QueueAction::Served {
                            entry_id,
                            served_at: env.clock.now(),
                        }],
                        vec![VisitEvent::Served {
                            entry_id,
                            ticket_number: entry.ticket_number,
                        }],
                    ),
                    Err(error) => Self::reject(state, error),
                }
            },

            QueueAction::MarkCompleted { entry_id } => {
                state.last_error = None;
                match Self::require(state, entry_id, &[QueueStatus::Served], QueueStatus::Completed) {
                    Ok(entry) => {
                        tracing::info!(%entry_id, ticket_number = %entry.ticket_number, "Visit completed");
                        Self::commit(
                            state,
                            env,
                            vec![QueueAction::Completed {
                                entry_id,
                                completed_at: env.clock.now(),
                            }],
                            vec![VisitEvent::Completed {
                                entry_id,
                                ticket_number: entry.ticket_number,
                            }],
                        )
                    },
                    Err(error) => Self::reject(state, error),
                }
            },

            QueueAction::Cancel { entry_id, reason } => {
                state.last_error = None;
                match Self::require(
                    state,
                    entry_id,
                    &[QueueStatus::Waiting, QueueStatus::Called],
                    QueueStatus::Cancelled,
                ) {
                    Ok(entry) => {
                        tracing::info!(%entry_id, reason = %reason, "Queue entry cancelled");
                        let (event, notification) = Self::cancellation(&entry, reason, env.clock.now());
                        Self::commit(state, env, vec![event], vec![notification])
                    },
                    Err(error) => Self::reject(state, error),
                }
            },

            QueueAction::CloseDay { date } => {
                state.last_error = None;
                let now = env.clock.now();
                let mut open: Vec<&QueueEntry> = state
                    .entries
                    .values()
                    .filter(|e| e.status.is_open() && e.service_date == date)
                    .collect();
                open.sort_by_key(|e| e.join_order);

                let (events, notifications): (Vec<_>, Vec<_>) = open
                    .into_iter()
                    .map(|entry| Self::cancellation(entry, CancelReason::NoShow, now))
                    .unzip();
                if events.is_empty() {
                    return SmallVec::new();
                }

                tracing::info!(%date, no_shows = events.len(), "Queue closed for the day");
                Self::commit(state, env, events, notifications)
            },

            QueueAction::PersistenceFailed { error } => {
                tracing::error!(stream = STREAM, error = %error, "Queue events were not persisted");
                SmallVec::new()
            },

            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::aggregates::test_support;
    use crate::events::NOTIFICATION_TOPIC;
    use proptest::prelude::*;
    use visitgate_testing::{FixedClock, ReducerTest, assertions, test_clock};

    fn env_with(clock: FixedClock) -> QueueEnvironment {
        QueueEnvironment::new(Arc::new(Config::default()), Arc::new(clock), test_support::log(STREAM))
    }

    fn env() -> QueueEnvironment {
        env_with(test_clock())
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn enqueue(id: EntryId, seq: u32, priority: QueuePriority) -> QueueAction {
        QueueAction::Enqueue {
            entry_id: id,
            ticket_number: TicketNumber::format("FD", 2025, seq),
            reservation_id: ReservationId::new(),
            category: Category::food(),
            service_date: today(),
            priority,
        }
    }

    fn call_food() -> QueueAction {
        QueueAction::CallNext {
            category: Category::food(),
        }
    }

    fn queue_of(ids: &[EntryId]) -> QueueState {
        let reducer = QueueReducer::new();
        let env = env();
        let mut state = QueueState::new(3);
        for (n, id) in ids.iter().enumerate() {
            let _ = reducer.reduce(
                &mut state,
                enqueue(*id, u32::try_from(n).unwrap() + 1, QueuePriority::Standard),
                &env,
            );
        }
        state
    }

    #[test]
    fn positions_follow_join_order() {
        let ids = [EntryId::new(), EntryId::new(), EntryId::new()];
        let state = queue_of(&ids);

        let positions: Vec<usize> = ids.iter().map(|id| state.position(*id).unwrap()).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn same_ticket_cannot_join_twice() {
        let first = EntryId::new();
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(QueueState::new(5))
            .when_action(enqueue(first, 1, QueuePriority::Standard))
            .when_action(enqueue(EntryId::new(), 1, QueuePriority::Standard))
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(AdmissionError::AlreadyQueued(TicketNumber::format("FD", 2025, 1)))
                );
                assert_eq!(state.waiting_count(), 1);
            })
            .run();
    }

    #[test]
    fn priority_entries_are_called_first() {
        let standard = EntryId::new();
        let priority = EntryId::new();
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(QueueState::new(5))
            .when_action(enqueue(standard, 1, QueuePriority::Standard))
            .when_action(enqueue(priority, 2, QueuePriority::Priority))
            .when_action(call_food())
            .then_state(move |state| {
                assert_eq!(state.last_called, Some(priority));
                assert_eq!(state.now_serving(&Category::food()).map(|e| e.id), Some(priority));
                assert_eq!(state.position(standard).unwrap(), 1);
            })
            .then_effects(|effects| {
                assertions::assert_publishes_to(effects, NOTIFICATION_TOPIC);
                assert_eq!(assertions::published_event_types(effects), vec!["Called.v1"]);
            })
            .run();
    }

    #[test]
    fn priority_shortens_the_wait_but_keeps_join_order_positions() {
        let standard = EntryId::new();
        let priority = EntryId::new();
        let reducer = QueueReducer::new();
        let env = env();
        let mut state = QueueState::new(5);
        let _ = reducer.reduce(&mut state, enqueue(standard, 1, QueuePriority::Standard), &env);
        let _ = reducer.reduce(&mut state, enqueue(priority, 2, QueuePriority::Priority), &env);

        assert_eq!(state.position(standard).unwrap(), 1);
        assert_eq!(state.position(priority).unwrap(), 2);

        let config = Config::default();
        assert_eq!(state.estimated_wait(priority, &config).unwrap(), Duration::ZERO);
        assert_eq!(
            state.estimated_wait(standard, &config).unwrap(),
            Duration::from_secs(10 * 60)
        );
    }

    #[test]
    fn call_next_on_empty_queue_returns_nothing() {
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(QueueState::new(5))
            .when_action(call_food())
            .then_state(|state| {
                assert!(state.last_called.is_none());
                assert!(state.last_error.is_none());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn completing_a_waiting_entry_is_invalid() {
        let id = EntryId::new();
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(QueueState::new(5))
            .when_action(enqueue(id, 1, QueuePriority::Standard))
            .when_action(QueueAction::MarkCompleted { entry_id: id })
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(AdmissionError::InvalidStateTransition {
                        entity: "queue entry",
                        from: "waiting",
                        to: "completed",
                    })
                );
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn served_requires_called() {
        let id = EntryId::new();
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(QueueState::new(5))
            .when_action(enqueue(id, 1, QueuePriority::Standard))
            .when_action(QueueAction::MarkServed { entry_id: id })
            .then_state(|state| {
                assert!(matches!(
                    state.last_error,
                    Some(AdmissionError::InvalidStateTransition { from: "waiting", .. })
                ));
            })
            .run();
    }

    #[test]
    fn cancelled_entry_has_no_position() {
        let first = EntryId::new();
        let second = EntryId::new();
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(queue_of(&[first, second]))
            .when_action(QueueAction::Cancel {
                entry_id: first,
                reason: CancelReason::LeftQueue,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.position(first),
                    Err(AdmissionError::NotWaiting { status: "cancelled" })
                );
                assert_eq!(state.position(second).unwrap(), 1);
                assert!(state.open_entry_for(&TicketNumber::format("FD", 2025, 1)).is_none());
            })
            .then_effects(|effects| {
                assert_eq!(assertions::published_event_types(effects), vec!["Cancelled.v1"]);
            })
            .run();
    }

    #[test]
    fn close_day_turns_open_entries_into_no_shows() {
        let ids = [EntryId::new(), EntryId::new()];
        ReducerTest::new(QueueReducer::new())
            .with_env(env())
            .given_state(queue_of(&ids))
            .when_action(call_food())
            .when_action(QueueAction::CloseDay { date: today() })
            .then_state(move |state| {
                for id in ids {
                    let entry = state.entry(id).unwrap();
                    assert_eq!(entry.status, QueueStatus::Cancelled);
                    assert_eq!(entry.cancel_reason, Some(CancelReason::NoShow));
                }
            })
            .then_effects(|effects| {
                assert_eq!(
                    assertions::appended_event_types(effects),
                    vec!["QueueCancelled.v1", "QueueCancelled.v1"]
                );
            })
            .run();
    }

    #[test]
    fn estimated_wait_uses_configured_time_without_samples() {
        let ids = [EntryId::new(), EntryId::new(), EntryId::new()];
        let state = queue_of(&ids);
        let config = Config::default();

        assert_eq!(state.estimated_wait(ids[0], &config).unwrap(), Duration::ZERO);
        // food defaults to 10 minutes per visitor
        assert_eq!(
            state.estimated_wait(ids[2], &config).unwrap(),
            Duration::from_secs(2 * 10 * 60)
        );
    }

    #[test]
    fn estimated_wait_follows_measured_service_times() {
        let clock = test_clock();
        let env = env_with(clock.clone());
        let reducer = QueueReducer::new();
        let served = EntryId::new();
        let waiting = [EntryId::new(), EntryId::new()];
        let mut state = QueueState::new(3);

        let _ = reducer.reduce(&mut state, enqueue(served, 1, QueuePriority::Standard), &env);
        for (n, id) in waiting.iter().enumerate() {
            let seq = u32::try_from(n).unwrap() + 2;
            let _ = reducer.reduce(&mut state, enqueue(*id, seq, QueuePriority::Standard), &env);
        }
        let _ = reducer.reduce(&mut state, call_food(), &env);
        let _ = reducer.reduce(&mut state, QueueAction::MarkServed { entry_id: served }, &env);
        clock.advance(chrono::Duration::minutes(4));
        let _ = reducer.reduce(&mut state, QueueAction::MarkCompleted { entry_id: served }, &env);

        assert_eq!(
            state.rolling_service_time(&Category::food()),
            Some(Duration::from_secs(4 * 60))
        );
        assert_eq!(
            state.estimated_wait(waiting[1], &Config::default()).unwrap(),
            Duration::from_secs(4 * 60)
        );
    }

    #[test]
    fn service_samples_keep_only_the_window() {
        let mut state = QueueState::new(2);
        for minutes in [10, 2, 4] {
            state.record_service_time(&Category::food(), TimeDelta::minutes(minutes));
        }
        assert_eq!(
            state.rolling_service_time(&Category::food()),
            Some(Duration::from_secs(3 * 60))
        );
    }

    #[test]
    fn entries_left_from_an_earlier_day_are_called_first() {
        let clock = test_clock();
        let env = env_with(clock.clone());
        let reducer = QueueReducer::new();
        let mut state = QueueState::new(3);
        let leftover = EntryId::new();
        let _ = reducer.reduce(&mut state, enqueue(leftover, 1, QueuePriority::Standard), &env);

        clock.advance_days(1);
        let arrived_today = EntryId::new();
        let _ = reducer.reduce(
            &mut state,
            QueueAction::Enqueue {
                entry_id: arrived_today,
                ticket_number: TicketNumber::format("FD", 2025, 2),
                reservation_id: ReservationId::new(),
                category: Category::food(),
                service_date: today().succ_opt().unwrap(),
                priority: QueuePriority::Standard,
            },
            &env,
        );
        assert_eq!(state.position(arrived_today).unwrap(), 2);

        let _ = reducer.reduce(&mut state, call_food(), &env);
        assert_eq!(state.last_called, Some(leftover));
        assert_eq!(state.position(arrived_today).unwrap(), 1);
    }

    proptest! {
        #[test]
        fn earlier_joiners_stay_ahead(
            count in 2usize..12,
            cancel_mask in proptest::collection::vec(any::<bool>(), 12),
        ) {
            let ids: Vec<EntryId> = (0..count).map(|_| EntryId::new()).collect();
            let mut state = queue_of(&ids);
            let reducer = QueueReducer::new();
            let env = env();

            for (id, cancel) in ids.iter().zip(&cancel_mask) {
                if *cancel {
                    let _ = reducer.reduce(
                        &mut state,
                        QueueAction::Cancel { entry_id: *id, reason: CancelReason::LeftQueue },
                        &env,
                    );
                }
            }

            let positions: Vec<usize> = ids.iter().filter_map(|id| state.position(*id).ok()).collect();
            let expected: Vec<usize> = (1..=positions.len()).collect();
            prop_assert_eq!(positions, expected);
        }
    }
}
