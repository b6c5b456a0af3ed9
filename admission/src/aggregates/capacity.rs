//! Capacity ledger: per (date, category) counters.
//!
//! This is the single serialization point for "never oversell a day". The
//! hosting store reduces one action at a time, so `TryReserve` observes and
//! increments the count without any other reservation in between.
//!
//! Every taken slot is held by a reservation id, so a release names the
//! reservation it returns and a second release of the same one is ignored.
//!
//! Days are created lazily from the category defaults the first time they
//! are mutated. Reads of a day that does not exist yet return the defaults
//! without storing them.

use super::{AggregateLog, CommandOutcome};
use crate::config::Config;
use crate::error::{AdmissionError, CapacityRejection};
use crate::types::{CapacityDay, Category, ReservationId};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use visitgate_core::event::Event;
use visitgate_core::{SmallVec, effect::Effect, reducer::Reducer};
use visitgate_runtime::store::Store;

/// Stream holding every ledger event.
pub const STREAM: &str = "capacity-ledger";

/// Store hosting the ledger.
pub type LedgerStore = Store<LedgerState, LedgerAction, LedgerEnvironment, LedgerReducer>;

// ============================================================================
// State
// ============================================================================

/// Every materialized day.
#[derive(Clone, Debug, Default)]
pub struct LedgerState {
    days: BTreeMap<(NaiveDate, Category), CapacityDay>,
    holders: HashSet<ReservationId>,
    /// Rejection of the last command
    pub last_error: Option<AdmissionError>,
}

impl LedgerState {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored day, if it has been materialized.
    #[must_use]
    pub fn day(&self, date: NaiveDate, category: &Category) -> Option<&CapacityDay> {
        self.days.get(&(date, category.clone()))
    }

    /// Stored day or the defaults it would be created with.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::UnknownCategory`] if `category` is not configured.
    pub fn availability(
        &self,
        date: NaiveDate,
        category: &Category,
        config: &Config,
    ) -> Result<CapacityDay, AdmissionError> {
        match self.day(date, category) {
            Some(day) => Ok(day.clone()),
            None => default_day(config, date, category),
        }
    }

    /// `true` while `reservation_id` holds a slot or an exempt count.
    #[must_use]
    pub fn holds(&self, reservation_id: ReservationId) -> bool {
        self.holders.contains(&reservation_id)
    }

    fn day_mut(&mut self, date: NaiveDate, category: &Category) -> Option<&mut CapacityDay> {
        self.days.get_mut(&(date, category.clone()))
    }

    /// Number of materialized days.
    #[must_use]
    pub fn len(&self) -> usize {
        self.days.len()
    }

    /// `true` if no day has been materialized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl CommandOutcome for LedgerState {
    fn last_error(&self) -> Option<&AdmissionError> {
        self.last_error.as_ref()
    }
}

fn default_day(config: &Config, date: NaiveDate, category: &Category) -> Result<CapacityDay, AdmissionError> {
    let rules = config
        .category(category)
        .ok_or_else(|| AdmissionError::UnknownCategory(category.clone()))?;

    Ok(CapacityDay {
        date,
        category: category.clone(),
        max_capacity: rules.daily_capacity,
        current_count: 0,
        exempt_count: 0,
        is_operating_day: !config.is_closed_weekday(date.weekday()),
    })
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Commands and events of the capacity ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerAction {
    // Commands
    /// Take one slot, or reject with `Full` / `Closed`
    TryReserve {
        /// Reservation taking the slot
        reservation_id: ReservationId,
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
    },
    /// Count a capacity-exempt reservation
    RecordExempt {
        /// Exempt reservation
        reservation_id: ReservationId,
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
    },
    /// Return one slot, floored at zero
    Release {
        /// Reservation giving the slot back
        reservation_id: ReservationId,
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
    },
    /// Return one exempt reservation, floored at zero
    ReleaseExempt {
        /// Exempt reservation
        reservation_id: ReservationId,
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
    },
    /// Open or close a day
    SetOperatingDay {
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
        /// `true` to accept reservations
        open: bool,
    },
    /// Override the day's capacity
    SetDailyCapacity {
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
        /// New maximum, at least the slots already taken
        max_capacity: u32,
    },

    // Events
    /// A day was materialized from the category defaults
    DayInitialized {
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
        /// Default capacity
        max_capacity: u32,
        /// Default calendar decision
        is_operating_day: bool,
    },
    /// One slot taken
    CapacityReserved {
        /// Reservation holding the slot
        reservation_id: ReservationId,
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
    },
    /// One exempt reservation counted
    ExemptRecorded {
        /// Exempt reservation
        reservation_id: ReservationId,
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
    },
    /// One slot returned
    CapacityReleased {
        /// Reservation that held the slot
        reservation_id: ReservationId,
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
    },
    /// One exempt reservation returned
    ExemptReleased {
        /// Exempt reservation
        reservation_id: ReservationId,
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
    },
    /// Day opened or closed
    OperatingDaySet {
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
        /// New flag
        open: bool,
    },
    /// Capacity overridden
    DailyCapacitySet {
        /// Day
        date: NaiveDate,
        /// Category
        category: Category,
        /// New maximum
        max_capacity: u32,
    },
    /// Appending to the event store failed after retries
    PersistenceFailed {
        /// Error message
        error: String,
    },
}

impl Event for LedgerAction {
    fn event_type(&self) -> &'static str {
        match self {
            Self::TryReserve { .. }
            | Self::RecordExempt { .. }
            | Self::Release { .. }
            | Self::ReleaseExempt { .. }
            | Self::SetOperatingDay { .. }
            | Self::SetDailyCapacity { .. } => "LedgerCommand",
            Self::DayInitialized { .. } => "DayInitialized.v1",
            Self::CapacityReserved { .. } => "CapacityReserved.v1",
            Self::ExemptRecorded { .. } => "ExemptRecorded.v1",
            Self::CapacityReleased { .. } => "CapacityReleased.v1",
            Self::ExemptReleased { .. } => "ExemptReleased.v1",
            Self::OperatingDaySet { .. } => "OperatingDaySet.v1",
            Self::DailyCapacitySet { .. } => "DailyCapacitySet.v1",
            Self::PersistenceFailed { .. } => "LedgerPersistenceFailed",
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the ledger reducer.
#[derive(Clone)]
pub struct LedgerEnvironment {
    /// Category defaults and calendar
    pub config: Arc<Config>,
    /// Event stream
    pub log: AggregateLog,
}

impl LedgerEnvironment {
    /// Creates a new `LedgerEnvironment`
    #[must_use]
    pub const fn new(config: Arc<Config>, log: AggregateLog) -> Self {
        Self { config, log }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the capacity ledger.
#[derive(Clone, Copy, Debug, Default)]
pub struct LedgerReducer;

impl LedgerReducer {
    /// Creates a new `LedgerReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The stored day, or a fresh default plus the event that materializes it.
    fn materialize(
        state: &LedgerState,
        env: &LedgerEnvironment,
        date: NaiveDate,
        category: &Category,
    ) -> Result<(CapacityDay, Option<LedgerAction>), AdmissionError> {
        if let Some(day) = state.day(date, category) {
            return Ok((day.clone(), None));
        }
        let day = default_day(&env.config, date, category)?;
        let initialized = LedgerAction::DayInitialized {
            date,
            category: category.clone(),
            max_capacity: day.max_capacity,
            is_operating_day: day.is_operating_day,
        };
        Ok((day, Some(initialized)))
    }

    fn validate_try_reserve(day: &CapacityDay) -> Result<(), CapacityRejection> {
        if !day.is_operating_day {
            return Err(CapacityRejection::Closed);
        }
        if day.current_count >= day.max_capacity {
            return Err(CapacityRejection::Full);
        }
        Ok(())
    }

    /// Apply an event to state. Commands are ignored.
    pub fn apply_event(state: &mut LedgerState, action: &LedgerAction) {
        match action {
            LedgerAction::DayInitialized {
                date,
                category,
                max_capacity,
                is_operating_day,
            } => {
                state.days.insert(
                    (*date, category.clone()),
                    CapacityDay {
                        date: *date,
                        category: category.clone(),
                        max_capacity: *max_capacity,
                        current_count: 0,
                        exempt_count: 0,
                        is_operating_day: *is_operating_day,
                    },
                );
            },
            LedgerAction::CapacityReserved {
                reservation_id,
                date,
                category,
            } => {
                state.holders.insert(*reservation_id);
                if let Some(day) = state.day_mut(*date, category) {
                    day.current_count = day.current_count.saturating_add(1).min(day.max_capacity);
                }
            },
            LedgerAction::ExemptRecorded {
                reservation_id,
                date,
                category,
            } => {
                state.holders.insert(*reservation_id);
                if let Some(day) = state.day_mut(*date, category) {
                    day.exempt_count = day.exempt_count.saturating_add(1);
                }
            },
            LedgerAction::CapacityReleased {
                reservation_id,
                date,
                category,
            } => {
                state.holders.remove(reservation_id);
                if let Some(day) = state.day_mut(*date, category) {
                    day.current_count = day.current_count.saturating_sub(1);
                }
            },
            LedgerAction::ExemptReleased {
                reservation_id,
                date,
                category,
            } => {
                state.holders.remove(reservation_id);
                if let Some(day) = state.day_mut(*date, category) {
                    day.exempt_count = day.exempt_count.saturating_sub(1);
                }
            },
            LedgerAction::OperatingDaySet { date, category, open } => {
                if let Some(day) = state.day_mut(*date, category) {
                    day.is_operating_day = *open;
                }
            },
            LedgerAction::DailyCapacitySet {
                date,
                category,
                max_capacity,
            } => {
                if let Some(day) = state.day_mut(*date, category) {
                    day.max_capacity = *max_capacity;
                }
            },
            LedgerAction::TryReserve { .. }
            | LedgerAction::RecordExempt { .. }
            | LedgerAction::Release { .. }
            | LedgerAction::ReleaseExempt { .. }
            | LedgerAction::SetOperatingDay { .. }
            | LedgerAction::SetDailyCapacity { .. }
            | LedgerAction::PersistenceFailed { .. } => {},
        }
    }

    fn reject(state: &mut LedgerState, error: AdmissionError) -> SmallVec<[Effect<LedgerAction>; 4]> {
        state.last_error = Some(error);
        SmallVec::new()
    }

    /// Apply `event` (after the optional day initialization) and persist both.
    fn commit(
        state: &mut LedgerState,
        env: &LedgerEnvironment,
        initialized: Option<LedgerAction>,
        event: LedgerAction,
    ) -> SmallVec<[Effect<LedgerAction>; 4]> {
        let events: Vec<LedgerAction> = initialized.into_iter().chain(std::iter::once(event)).collect();
        for event in &events {
            Self::apply_event(state, event);
        }
        env.log
            .record(&events, Vec::new(), |error| LedgerAction::PersistenceFailed { error })
    }
}

impl Reducer for LedgerReducer {
    type State = LedgerState;
    type Action = LedgerAction;
    type Environment = LedgerEnvironment;

    #[allow(clippy::too_many_lines)] // one arm per command
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            LedgerAction::TryReserve {
                reservation_id,
                date,
                category,
            } => {
                state.last_error = None;
                if state.holds(reservation_id) {
                    return SmallVec::new();
                }
                let (day, initialized) = match Self::materialize(state, env, date, &category) {
                    Ok(found) => found,
                    Err(error) => return Self::reject(state, error),
                };

                if let Err(reason) = Self::validate_try_reserve(&day) {
                    match reason {
                        CapacityRejection::Full => {
                            tracing::warn!(%date, %category, max = day.max_capacity, "Day is full");
                        },
                        CapacityRejection::Closed => {
                            tracing::debug!(%date, %category, "Day is closed");
                        },
                    }
                    return Self::reject(
                        state,
                        AdmissionError::NoCapacity {
                            date,
                            category,
                            reason,
                        },
                    );
                }

                tracing::debug!(
                    %date,
                    %category,
                    taken = day.current_count + 1,
                    max = day.max_capacity,
                    "Slot reserved"
                );
                Self::commit(
                    state,
                    env,
                    initialized,
                    LedgerAction::CapacityReserved {
                        reservation_id,
                        date,
                        category,
                    },
                )
            },

            LedgerAction::RecordExempt {
                reservation_id,
                date,
                category,
            } => {
                state.last_error = None;
                if state.holds(reservation_id) {
                    return SmallVec::new();
                }
                match Self::materialize(state, env, date, &category) {
                    Ok((_, initialized)) => {
                        tracing::debug!(%date, %category, "Exempt reservation recorded");
                        Self::commit(
                            state,
                            env,
                            initialized,
                            LedgerAction::ExemptRecorded {
                                reservation_id,
                                date,
                                category,
                            },
                        )
                    },
                    Err(error) => Self::reject(state, error),
                }
            },

            LedgerAction::Release {
                reservation_id,
                date,
                category,
            } => {
                state.last_error = None;
                if state.holds(reservation_id) {
                    Self::commit(
                        state,
                        env,
                        None,
                        LedgerAction::CapacityReleased {
                            reservation_id,
                            date,
                            category,
                        },
                    )
                } else {
                    tracing::warn!(%reservation_id, %date, %category, "Release of a slot not held, ignoring");
                    SmallVec::new()
                }
            },

            LedgerAction::ReleaseExempt {
                reservation_id,
                date,
                category,
            } => {
                state.last_error = None;
                if state.holds(reservation_id) {
                    Self::commit(
                        state,
                        env,
                        None,
                        LedgerAction::ExemptReleased {
                            reservation_id,
                            date,
                            category,
                        },
                    )
                } else {
                    tracing::warn!(%reservation_id, %date, %category, "Exempt release not held, ignoring");
                    SmallVec::new()
                }
            },

            LedgerAction::SetOperatingDay { date, category, open } => {
                state.last_error = None;
                match Self::materialize(state, env, date, &category) {
                    Ok((_, initialized)) => {
                        tracing::info!(%date, %category, open, "Operating day updated");
                        Self::commit(
                            state,
                            env,
                            initialized,
                            LedgerAction::OperatingDaySet { date, category, open },
                        )
                    },
                    Err(error) => Self::reject(state, error),
                }
            },

            LedgerAction::SetDailyCapacity {
                date,
                category,
                max_capacity,
            } => {
                state.last_error = None;
                let (day, initialized) = match Self::materialize(state, env, date, &category) {
                    Ok(found) => found,
                    Err(error) => return Self::reject(state, error),
                };
                if max_capacity < day.current_count {
                    return Self::reject(
                        state,
                        AdmissionError::InvalidCapacity {
                            requested: max_capacity,
                            current: day.current_count,
                        },
                    );
                }
                tracing::info!(%date, %category, max_capacity, "Daily capacity overridden");
                Self::commit(
                    state,
                    env,
                    initialized,
                    LedgerAction::DailyCapacitySet {
                        date,
                        category,
                        max_capacity,
                    },
                )
            },

            LedgerAction::PersistenceFailed { error } => {
                tracing::error!(stream = STREAM, error = %error, "Ledger events were not persisted");
                SmallVec::new()
            },

            // Events are only applied during replay
            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}
