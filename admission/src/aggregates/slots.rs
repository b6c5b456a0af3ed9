//! Slot allocator: reservations and the duplicate check.
//!
//! A reservation starts as a `Pending` claim. The claim is taken together
//! with the eligibility and duplicate checks in one reducer step, so two
//! concurrent requests for the same (requester, category, date) cannot both
//! pass. The desk then asks the ledger for capacity and either confirms or
//! abandons the claim.
//!
//! ```text
//! Pending ──confirm──▶ Reserved ──consume──▶ Consumed
//!    │                    │
//! abandon               cancel
//!    ▼                    ▼
//! (removed)           Released
//! ```

use super::{AggregateLog, CommandOutcome};
use crate::config::Config;
use crate::eligibility::{self, Eligibility};
use crate::error::AdmissionError;
use crate::events::VisitEvent;
use crate::types::{Category, RequesterId, ReservationId, SlotReservation, SlotStatus, TimeWindow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use visitgate_core::environment::Clock;
use visitgate_core::event::Event;
use visitgate_core::{SmallVec, effect::Effect, reducer::Reducer};
use visitgate_runtime::store::Store;

/// Stream holding every allocator event.
pub const STREAM: &str = "slot-allocator";

/// Store hosting the allocator.
pub type SlotStore = Store<SlotState, SlotAction, SlotEnvironment, SlotReducer>;

/// Reservations by id, indexed by requester.
#[derive(Clone, Debug, Default)]
pub struct SlotState {
    reservations: HashMap<ReservationId, SlotReservation>,
    by_requester: HashMap<RequesterId, Vec<ReservationId>>,
    /// Rejection of the last command
    pub last_error: Option<AdmissionError>,
}

impl SlotState {
    /// No reservations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reservation by id.
    #[must_use]
    pub fn reservation(&self, id: ReservationId) -> Option<&SlotReservation> {
        self.reservations.get(&id)
    }

    /// Every reservation of `requester`, oldest first.
    pub fn history(&self, requester: RequesterId) -> impl Iterator<Item = &SlotReservation> {
        self.by_requester
            .get(&requester)
            .into_iter()
            .flatten()
            .filter_map(|id| self.reservations.get(id))
    }

    /// `Reserved` reservations whose day is before `today`.
    #[must_use]
    pub fn stale_reserved(&self, today: NaiveDate) -> Vec<SlotReservation> {
        let mut stale: Vec<SlotReservation> = self
            .reservations
            .values()
            .filter(|r| r.status == SlotStatus::Reserved && r.date < today)
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.date, r.created_at));
        stale
    }

    /// Claims still waiting for a capacity decision.
    #[must_use]
    pub fn pending_claims(&self) -> Vec<SlotReservation> {
        self.reservations
            .values()
            .filter(|r| r.status == SlotStatus::Pending)
            .cloned()
            .collect()
    }

    /// Every `Reserved` reservation.
    pub fn reserved(&self) -> impl Iterator<Item = &SlotReservation> {
        self.reservations
            .values()
            .filter(|r| r.status == SlotStatus::Reserved)
    }

    /// Number of reservations, any status.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    /// `true` if there are no reservations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    fn holds_active(&self, requester: RequesterId, category: &Category, date: NaiveDate) -> bool {
        self.history(requester)
            .any(|r| r.status.is_active() && &r.category == category && r.date == date)
    }
}

impl CommandOutcome for SlotState {
    fn last_error(&self) -> Option<&AdmissionError> {
        self.last_error.as_ref()
    }
}

/// Commands and events of the slot allocator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotAction {
    // Commands
    /// Check eligibility and duplicates, then hold a pending claim
    Claim {
        /// Id for the new reservation
        reservation_id: ReservationId,
        /// Requester
        requester_id: RequesterId,
        /// Category
        category: Category,
        /// Requested day
        date: NaiveDate,
        /// Arrival window
        time_window: TimeWindow,
    },
    /// Capacity was granted
    Confirm {
        /// Pending reservation
        reservation_id: ReservationId,
    },
    /// Capacity was refused
    Abandon {
        /// Pending reservation
        reservation_id: ReservationId,
    },
    /// Cancel a reservation that has not been used yet
    Cancel {
        /// Reserved reservation
        reservation_id: ReservationId,
    },
    /// The ticket was redeemed
    Consume {
        /// Reserved reservation
        reservation_id: ReservationId,
    },

    // Events
    /// A claim was taken
    Claimed {
        /// The pending reservation
        reservation: SlotReservation,
    },
    /// Claim turned into a reservation
    Confirmed {
        /// Reservation
        reservation_id: ReservationId,
    },
    /// Claim dropped
    Abandoned {
        /// Reservation
        reservation_id: ReservationId,
    },
    /// Reservation cancelled or expired
    Released {
        /// Reservation
        reservation_id: ReservationId,
    },
    /// Reservation used at check-in
    Consumed {
        /// Reservation
        reservation_id: ReservationId,
    },
    /// Persisting or publishing failed after retries
    PersistenceFailed {
        /// Error message
        error: String,
    },
}

impl Event for SlotAction {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Claim { .. }
            | Self::Confirm { .. }
            | Self::Abandon { .. }
            | Self::Cancel { .. }
            | Self::Consume { .. } => "SlotCommand",
            Self::Claimed { .. } => "SlotClaimed.v1",
            Self::Confirmed { .. } => "SlotConfirmed.v1",
            Self::Abandoned { .. } => "SlotAbandoned.v1",
            Self::Released { .. } => "SlotReleased.v1",
            Self::Consumed { .. } => "SlotConsumed.v1",
            Self::PersistenceFailed { .. } => "SlotPersistenceFailed",
        }
    }
}

/// Dependencies of the allocator reducer.
#[derive(Clone)]
pub struct SlotEnvironment {
    /// Category rules
    pub config: Arc<Config>,
    /// Claim timestamps
    pub clock: Arc<dyn Clock>,
    /// Event stream and notifications
    pub log: AggregateLog,
}

impl SlotEnvironment {
    /// Creates a new `SlotEnvironment`
    #[must_use]
    pub fn new(config: Arc<Config>, clock: Arc<dyn Clock>, log: AggregateLog) -> Self {
        Self { config, clock, log }
    }
}

/// Reducer for the slot allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SlotReducer;

impl SlotReducer {
    /// Creates a new `SlotReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn validate_claim(
        state: &SlotState,
        env: &SlotEnvironment,
        requester_id: RequesterId,
        category: &Category,
        date: NaiveDate,
    ) -> Result<(), AdmissionError> {
        let rules = env
            .config
            .category(category)
            .ok_or_else(|| AdmissionError::UnknownCategory(category.clone()))?;

        if state.holds_active(requester_id, category, date) {
            return Err(AdmissionError::DuplicateReservation);
        }

        if let Eligibility::Ineligible { next_available } = eligibility::evaluate(
            &rules.eligibility_rule(),
            category,
            state.history(requester_id),
            date,
        ) {
            return Err(AdmissionError::Ineligible { next_available });
        }

        Ok(())
    }

    /// The reservation, if it exists and is in `expected`.
    fn require(
        state: &SlotState,
        id: ReservationId,
        expected: SlotStatus,
        to: SlotStatus,
    ) -> Result<SlotReservation, AdmissionError> {
        let reservation = state
            .reservation(id)
            .ok_or(AdmissionError::ReservationNotFound(id))?;
        if reservation.status != expected {
            return Err(AdmissionError::InvalidStateTransition {
                entity: "reservation",
                from: reservation.status.as_str(),
                to: to.as_str(),
            });
        }
        Ok(reservation.clone())
    }

    /// Apply an event to state. Commands are ignored.
    pub fn apply_event(state: &mut SlotState, action: &SlotAction) {
        let set_status = |state: &mut SlotState, id: &ReservationId, status: SlotStatus| {
            if let Some(reservation) = state.reservations.get_mut(id) {
                reservation.status = status;
            }
        };

        match action {
            SlotAction::Claimed { reservation } => {
                state
                    .by_requester
                    .entry(reservation.requester_id)
                    .or_default()
                    .push(reservation.id);
                state.reservations.insert(reservation.id, reservation.clone());
            },
            SlotAction::Confirmed { reservation_id } => {
                set_status(state, reservation_id, SlotStatus::Reserved);
            },
            SlotAction::Abandoned { reservation_id } => {
                if let Some(reservation) = state.reservations.remove(reservation_id) {
                    if let Some(ids) = state.by_requester.get_mut(&reservation.requester_id) {
                        ids.retain(|id| id != reservation_id);
                    }
                }
            },
            SlotAction::Released { reservation_id } => {
                set_status(state, reservation_id, SlotStatus::Released);
            },
            SlotAction::Consumed { reservation_id } => {
                set_status(state, reservation_id, SlotStatus::Consumed);
            },
            SlotAction::Claim { .. }
            | SlotAction::Confirm { .. }
            | SlotAction::Abandon { .. }
            | SlotAction::Cancel { .. }
            | SlotAction::Consume { .. }
            | SlotAction::PersistenceFailed { .. } => {},
        }
    }

    fn reject(state: &mut SlotState, error: AdmissionError) -> SmallVec<[Effect<SlotAction>; 4]> {
        tracing::debug!(error = %error, "Slot command rejected");
        state.last_error = Some(error);
        SmallVec::new()
    }

    fn commit(
        state: &mut SlotState,
        env: &SlotEnvironment,
        event: SlotAction,
        notification: Option<VisitEvent>,
    ) -> SmallVec<[Effect<SlotAction>; 4]> {
        Self::apply_event(state, &event);
        env.log.record(
            &[event],
            notification.into_iter().collect(),
            |error| SlotAction::PersistenceFailed { error },
        )
    }

    fn notification(reservation: &SlotReservation, granted: bool) -> VisitEvent {
        if granted {
            VisitEvent::SlotGranted {
                reservation_id: reservation.id,
                requester_id: reservation.requester_id,
                category: reservation.category.clone(),
                date: reservation.date,
            }
        } else {
            VisitEvent::SlotReleased {
                reservation_id: reservation.id,
                requester_id: reservation.requester_id,
                category: reservation.category.clone(),
                date: reservation.date,
            }
        }
    }
}

impl Reducer for SlotReducer {
    type State = SlotState;
    type Action = SlotAction;
    type Environment = SlotEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            SlotAction::Claim {
                reservation_id,
                requester_id,
                category,
                date,
                time_window,
            } => {
                state.last_error = None;
                if let Err(error) = Self::validate_claim(state, env, requester_id, &category, date) {
                    return Self::reject(state, error);
                }

                tracing::debug!(%reservation_id, %requester_id, %category, %date, "Slot claimed");
                let reservation = SlotReservation {
                    id: reservation_id,
                    requester_id,
                    category,
                    date,
                    time_window,
                    status: SlotStatus::Pending,
                    created_at: env.clock.now(),
                };
                Self::commit(state, env, SlotAction::Claimed { reservation }, None)
            },

            SlotAction::Confirm { reservation_id } => {
                state.last_error = None;
                match Self::require(state, reservation_id, SlotStatus::Pending, SlotStatus::Reserved) {
                    Ok(reservation) => {
                        tracing::info!(%reservation_id, category = %reservation.category, date = %reservation.date, "Slot granted");
                        Self::commit(
                            state,
                            env,
                            SlotAction::Confirmed { reservation_id },
                            Some(Self::notification(&reservation, true)),
                        )
                    },
                    Err(error) => Self::reject(state, error),
                }
            },

            SlotAction::Abandon { reservation_id } => {
                state.last_error = None;
                match Self::require(state, reservation_id, SlotStatus::Pending, SlotStatus::Released) {
                    Ok(_) => Self::commit(state, env, SlotAction::Abandoned { reservation_id }, None),
                    Err(error) => Self::reject(state, error),
                }
            },

            SlotAction::Cancel { reservation_id } => {
                state.last_error = None;
                match Self::require(state, reservation_id, SlotStatus::Reserved, SlotStatus::Released) {
                    Ok(reservation) => {
                        tracing::info!(%reservation_id, "Reservation released");
                        Self::commit(
                            state,
                            env,
                            SlotAction::Released { reservation_id },
                            Some(Self::notification(&reservation, false)),
                        )
                    },
                    Err(error) => Self::reject(state, error),
                }
            },

            SlotAction::Consume { reservation_id } => {
                state.last_error = None;
                match Self::require(state, reservation_id, SlotStatus::Reserved, SlotStatus::Consumed) {
                    Ok(_) => Self::commit(state, env, SlotAction::Consumed { reservation_id }, None),
                    Err(error) => Self::reject(state, error),
                }
            },

            SlotAction::PersistenceFailed { error } => {
                tracing::error!(stream = STREAM, error = %error, "Slot events were not persisted");
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
    use chrono::NaiveTime;
    use visitgate_testing::{FixedClock, ReducerTest, assertions, test_clock};

    fn env_with(clock: FixedClock) -> SlotEnvironment {
        SlotEnvironment::new(Arc::new(Config::default()), Arc::new(clock), test_support::log(STREAM))
    }

    fn env() -> SlotEnvironment {
        env_with(test_clock())
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        )
        .unwrap()
    }

    fn claim(id: ReservationId, requester: RequesterId, day: NaiveDate) -> SlotAction {
        SlotAction::Claim {
            reservation_id: id,
            requester_id: requester,
            category: Category::food(),
            date: day,
            time_window: window(),
        }
    }

    #[test]
    fn claim_then_confirm_grants_and_notifies() {
        let id = ReservationId::new();
        ReducerTest::new(SlotReducer::new())
            .with_env(env())
            .given_state(SlotState::new())
            .when_action(claim(id, RequesterId::new(), date(2)))
            .when_action(SlotAction::Confirm { reservation_id: id })
            .then_state(move |state| {
                assert_eq!(state.reservation(id).unwrap().status, SlotStatus::Reserved);
            })
            .then_effects(|effects| {
                assertions::assert_appends_to(effects, STREAM);
                assertions::assert_publishes_to(effects, NOTIFICATION_TOPIC);
                assert_eq!(assertions::published_event_types(effects), vec!["SlotGranted.v1"]);
            })
            .run();
    }

    #[test]
    fn second_claim_for_same_day_is_a_duplicate() {
        let requester = RequesterId::new();
        ReducerTest::new(SlotReducer::new())
            .with_env(env())
            .given_state(SlotState::new())
            .when_action(claim(ReservationId::new(), requester, date(2)))
            .when_action(claim(ReservationId::new(), requester, date(2)))
            .then_state(|state| {
                assert_eq!(state.last_error, Some(AdmissionError::DuplicateReservation));
                assert_eq!(state.len(), 1);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn consumed_visit_starts_the_cooldown() {
        let requester = RequesterId::new();
        let first = ReservationId::new();
        ReducerTest::new(SlotReducer::new())
            .with_env(env())
            .given_state(SlotState::new())
            .when_action(claim(first, requester, date(1)))
            .when_action(SlotAction::Confirm { reservation_id: first })
            .when_action(SlotAction::Consume { reservation_id: first })
            .when_action(claim(ReservationId::new(), requester, date(3)))
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(AdmissionError::Ineligible {
                        next_available: date(8)
                    })
                );
            })
            .run();
    }

    #[test]
    fn booking_ahead_inside_the_cooldown_is_ineligible() {
        let requester = RequesterId::new();
        let monday = ReservationId::new();
        let tuesday = ReservationId::new();
        ReducerTest::new(SlotReducer::new())
            .with_env(env())
            .given_state(SlotState::new())
            .when_action(claim(monday, requester, date(6)))
            .when_action(SlotAction::Confirm { reservation_id: monday })
            .when_action(claim(tuesday, requester, date(7)))
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(AdmissionError::Ineligible {
                        next_available: date(13)
                    })
                );
                assert!(state.reservation(tuesday).is_none());
            })
            .run();
    }

    #[test]
    fn abandoned_claim_disappears() {
        let requester = RequesterId::new();
        let id = ReservationId::new();
        ReducerTest::new(SlotReducer::new())
            .with_env(env())
            .given_state(SlotState::new())
            .when_action(claim(id, requester, date(2)))
            .when_action(SlotAction::Abandon { reservation_id: id })
            .then_state(move |state| {
                assert!(state.reservation(id).is_none());
                assert_eq!(state.history(requester).count(), 0);
            })
            .then_effects(|effects| {
                assert_eq!(assertions::appended_event_types(effects), vec!["SlotAbandoned.v1"]);
                assert!(assertions::published_event_types(effects).is_empty());
            })
            .run();
    }

    #[test]
    fn cancel_requires_a_reserved_slot() {
        let id = ReservationId::new();
        ReducerTest::new(SlotReducer::new())
            .with_env(env())
            .given_state(SlotState::new())
            .when_action(claim(id, RequesterId::new(), date(2)))
            .when_action(SlotAction::Confirm { reservation_id: id })
            .when_action(SlotAction::Consume { reservation_id: id })
            .when_action(SlotAction::Cancel { reservation_id: id })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(AdmissionError::InvalidStateTransition {
                        entity: "reservation",
                        from: "consumed",
                        to: "released",
                    })
                );
                assert_eq!(state.reservation(id).unwrap().status, SlotStatus::Consumed);
            })
            .run();
    }

    #[test]
    fn released_reservation_frees_the_key() {
        let requester = RequesterId::new();
        let id = ReservationId::new();
        ReducerTest::new(SlotReducer::new())
            .with_env(env())
            .given_state(SlotState::new())
            .when_action(claim(id, requester, date(2)))
            .when_action(SlotAction::Confirm { reservation_id: id })
            .when_action(SlotAction::Cancel { reservation_id: id })
            .when_action(claim(ReservationId::new(), requester, date(2)))
            .then_state(|state| {
                assert!(state.last_error.is_none());
                assert_eq!(state.len(), 2);
            })
            .run();
    }

    #[test]
    fn unknown_reservation_is_reported() {
        let id = ReservationId::new();
        ReducerTest::new(SlotReducer::new())
            .with_env(env())
            .given_state(SlotState::new())
            .when_action(SlotAction::Cancel { reservation_id: id })
            .then_state(move |state| {
                assert_eq!(state.last_error, Some(AdmissionError::ReservationNotFound(id)));
            })
            .run();
    }

    #[test]
    fn stale_reservations_are_those_before_today() {
        let reducer = SlotReducer::new();
        let env = env();
        let mut state = SlotState::new();
        let old = ReservationId::new();
        let current = ReservationId::new();
        for (id, day) in [(old, date(2)), (current, date(6))] {
            let _ = reducer.reduce(&mut state, claim(id, RequesterId::new(), day), &env);
            let _ = reducer.reduce(&mut state, SlotAction::Confirm { reservation_id: id }, &env);
        }

        let stale: Vec<_> = state.stale_reserved(date(6)).into_iter().map(|r| r.id).collect();
        assert_eq!(stale, vec![old]);
    }
}
