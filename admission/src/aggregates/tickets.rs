//! Credential issuer: ticket numbers, redemption and single use.
//!
//! Redemption is exactly-once because the hosting store reduces one action
//! at a time: the first `Redeem` flips the ticket to `Used`, every later one
//! sees `AlreadyUsed`.

use super::{AggregateLog, CommandOutcome};
use crate::config::Config;
use crate::error::{AdmissionError, TicketRejection};
use crate::events::VisitEvent;
use crate::types::{Category, RequesterId, ReservationId, StaffId, Ticket, TicketNumber, TicketStatus};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use visitgate_core::environment::Clock;
use visitgate_core::event::Event;
use visitgate_core::{SmallVec, effect::Effect, reducer::Reducer};
use visitgate_runtime::store::Store;

/// Stream holding every issuer event.
pub const STREAM: &str = "credential-issuer";

/// Store hosting the issuer.
pub type TicketStore = Store<TicketState, TicketAction, TicketEnvironment, TicketReducer>;

/// Tickets by number plus the per-prefix sequences.
#[derive(Clone, Debug, Default)]
pub struct TicketState {
    tickets: HashMap<TicketNumber, Ticket>,
    by_reservation: HashMap<ReservationId, TicketNumber>,
    /// Last sequence handed out per (prefix, year)
    sequences: HashMap<(String, i32), u32>,
    /// Rejection of the last command
    pub last_error: Option<AdmissionError>,
}

impl TicketState {
    /// No tickets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticket by number.
    #[must_use]
    pub fn ticket(&self, number: &TicketNumber) -> Option<&Ticket> {
        self.tickets.get(number)
    }

    /// Ticket issued for `reservation`.
    #[must_use]
    pub fn ticket_for(&self, reservation: ReservationId) -> Option<&Ticket> {
        self.by_reservation
            .get(&reservation)
            .and_then(|number| self.tickets.get(number))
    }

    /// Number of tickets ever issued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// `true` if no ticket has been issued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl CommandOutcome for TicketState {
    fn last_error(&self) -> Option<&AdmissionError> {
        self.last_error.as_ref()
    }
}

/// Commands and events of the credential issuer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketAction {
    // Commands
    /// Mint the ticket for a confirmed reservation; idempotent per reservation
    IssueTicket {
        /// Reservation
        reservation_id: ReservationId,
        /// Requester
        requester_id: RequesterId,
        /// Category, selects the number prefix
        category: Category,
        /// Reserved day
        valid_date: NaiveDate,
    },
    /// Validate and consume a ticket
    Redeem {
        /// Presented number
        ticket_number: TicketNumber,
        /// Staff member at the desk
        redeemed_by: StaffId,
    },
    /// Cancel the ticket of a reservation about to be released
    CancelTicket {
        /// Reservation
        reservation_id: ReservationId,
    },

    // Events
    /// Ticket minted
    TicketIssued {
        /// The new ticket
        ticket: Ticket,
        /// Sequence encoded in the number
        sequence: u32,
    },
    /// Ticket consumed
    TicketRedeemed {
        /// Number
        ticket_number: TicketNumber,
        /// Staff member
        redeemed_by: StaffId,
        /// When
        redeemed_at: DateTime<Utc>,
    },
    /// Ticket cancelled with its reservation
    TicketCancelled {
        /// Number
        ticket_number: TicketNumber,
    },
    /// Persisting or publishing failed after retries
    PersistenceFailed {
        /// Error message
        error: String,
    },
}

impl Event for TicketAction {
    fn event_type(&self) -> &'static str {
        match self {
            Self::IssueTicket { .. } | Self::Redeem { .. } | Self::CancelTicket { .. } => "TicketCommand",
            Self::TicketIssued { .. } => "TicketIssued.v1",
            Self::TicketRedeemed { .. } => "TicketRedeemed.v1",
            Self::TicketCancelled { .. } => "TicketCancelled.v1",
            Self::PersistenceFailed { .. } => "TicketPersistenceFailed",
        }
    }
}

/// Dependencies of the issuer reducer.
#[derive(Clone)]
pub struct TicketEnvironment {
    /// Prefixes and numbering limits
    pub config: Arc<Config>,
    /// Issue and redemption times, "today" for the validity check
    pub clock: Arc<dyn Clock>,
    /// Event stream and notifications
    pub log: AggregateLog,
}

impl TicketEnvironment {
    /// Creates a new `TicketEnvironment`
    #[must_use]
    pub fn new(config: Arc<Config>, clock: Arc<dyn Clock>, log: AggregateLog) -> Self {
        Self { config, clock, log }
    }
}

/// Reducer for the credential issuer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TicketReducer;

impl TicketReducer {
    /// Creates a new `TicketReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Next unused number for `prefix` in `year`, skipping numbers already
    /// taken.
    fn allocate_number(
        state: &TicketState,
        prefix: &str,
        year: i32,
        attempts: u32,
    ) -> Result<(TicketNumber, u32), AdmissionError> {
        let last = state
            .sequences
            .get(&(prefix.to_string(), year))
            .copied()
            .unwrap_or(0);

        for offset in 1..=attempts.max(1) {
            let Some(sequence) = last.checked_add(offset) else {
                break;
            };
            let number = TicketNumber::format(prefix, year, sequence);
            if !state.tickets.contains_key(&number) {
                return Ok((number, sequence));
            }
            tracing::warn!(ticket_number = %number, "Ticket number already taken, trying the next one");
        }

        Err(AdmissionError::TicketNumbersExhausted {
            prefix: prefix.to_string(),
        })
    }

    /// Rejection reasons in priority order: not found, used or cancelled,
    /// wrong day.
    fn validate_redeem(state: &TicketState, number: &TicketNumber, today: NaiveDate) -> Result<Ticket, TicketRejection> {
        let ticket = state.ticket(number).ok_or(TicketRejection::NotFound)?;
        match ticket.status {
            TicketStatus::Used => return Err(TicketRejection::AlreadyUsed),
            TicketStatus::Cancelled => return Err(TicketRejection::Cancelled),
            TicketStatus::Active | TicketStatus::Expired => {},
        }
        if today != ticket.valid_date {
            return Err(TicketRejection::WrongDay {
                valid_date: ticket.valid_date,
                today,
            });
        }
        Ok(ticket.clone())
    }

    /// Apply an event to state. Commands are ignored.
    pub fn apply_event(state: &mut TicketState, action: &TicketAction) {
        match action {
            TicketAction::TicketIssued { ticket, sequence } => {
                let prefix = ticket
                    .number
                    .as_str()
                    .split('-')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let year = ticket.issued_at.year();
                let last = state.sequences.entry((prefix, year)).or_insert(0);
                *last = (*last).max(*sequence);

                state.by_reservation.insert(ticket.reservation_id, ticket.number.clone());
                state.tickets.insert(ticket.number.clone(), ticket.clone());
            },
            TicketAction::TicketRedeemed {
                ticket_number,
                redeemed_by,
                redeemed_at,
            } => {
                if let Some(ticket) = state.tickets.get_mut(ticket_number) {
                    ticket.status = TicketStatus::Used;
                    ticket.redeemed_at = Some(*redeemed_at);
                    ticket.redeemed_by = Some(*redeemed_by);
                }
            },
            TicketAction::TicketCancelled { ticket_number } => {
                if let Some(ticket) = state.tickets.get_mut(ticket_number) {
                    ticket.status = TicketStatus::Cancelled;
                }
            },
            TicketAction::IssueTicket { .. }
            | TicketAction::Redeem { .. }
            | TicketAction::CancelTicket { .. }
            | TicketAction::PersistenceFailed { .. } => {},
        }
    }

    fn reject(state: &mut TicketState, error: AdmissionError) -> SmallVec<[Effect<TicketAction>; 4]> {
        state.last_error = Some(error);
        SmallVec::new()
    }

    fn commit(
        state: &mut TicketState,
        env: &TicketEnvironment,
        event: TicketAction,
        notification: Option<VisitEvent>,
    ) -> SmallVec<[Effect<TicketAction>; 4]> {
        Self::apply_event(state, &event);
        env.log.record(
            &[event],
            notification.into_iter().collect(),
            |error| TicketAction::PersistenceFailed { error },
        )
    }
}

impl Reducer for TicketReducer {
    type State = TicketState;
    type Action = TicketAction;
    type Environment = TicketEnvironment;

    #[allow(clippy::too_many_lines)] // one arm per command
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            TicketAction::IssueTicket {
                reservation_id,
                requester_id,
                category,
                valid_date,
            } => {
                state.last_error = None;
                if state.ticket_for(reservation_id).is_some() {
                    tracing::debug!(%reservation_id, "Ticket already issued for reservation");
                    return SmallVec::new();
                }

                let Some(rules) = env.config.category(&category) else {
                    return Self::reject(state, AdmissionError::UnknownCategory(category));
                };
                let issued_at = env.clock.now();
                let (number, sequence) = match Self::allocate_number(
                    state,
                    &rules.ticket_prefix,
                    issued_at.year(),
                    env.config.tickets.max_number_attempts,
                ) {
                    Ok(allocated) => allocated,
                    Err(error) => {
                        tracing::error!(%reservation_id, error = %error, "Could not allocate a ticket number");
                        return Self::reject(state, error);
                    },
                };

                tracing::info!(ticket_number = %number, %reservation_id, %valid_date, "Ticket issued");
                let ticket = Ticket {
                    number: number.clone(),
                    reservation_id,
                    requester_id,
                    category,
                    valid_date,
                    issued_at,
                    status: TicketStatus::Active,
                    redeemed_at: None,
                    redeemed_by: None,
                };
                let notification = VisitEvent::TicketIssued {
                    ticket_number: number,
                    reservation_id,
                    requester_id,
                    valid_date,
                };
                Self::commit(state, env, TicketAction::TicketIssued { ticket, sequence }, Some(notification))
            },

            TicketAction::Redeem {
                ticket_number,
                redeemed_by,
            } => {
                state.last_error = None;
                let today = env.clock.today();
                if let Err(rejection) = Self::validate_redeem(state, &ticket_number, today) {
                    if rejection == TicketRejection::AlreadyUsed {
                        tracing::warn!(%ticket_number, "Ticket already redeemed");
                    } else {
                        tracing::debug!(%ticket_number, reason = %rejection, "Redemption rejected");
                    }
                    return Self::reject(state, rejection.into());
                }

                let redeemed_at = env.clock.now();
                tracing::info!(%ticket_number, %redeemed_by, "Ticket redeemed");
                let notification = VisitEvent::TicketRedeemed {
                    ticket_number: ticket_number.clone(),
                    redeemed_by,
                    redeemed_at,
                };
                Self::commit(
                    state,
                    env,
                    TicketAction::TicketRedeemed {
                        ticket_number,
                        redeemed_by,
                        redeemed_at,
                    },
                    Some(notification),
                )
            },

            TicketAction::CancelTicket { reservation_id } => {
                state.last_error = None;
                // A reservation without a ticket is still inside request_slot
                let Some(ticket) = state.ticket_for(reservation_id) else {
                    tracing::debug!(%reservation_id, "No ticket to cancel");
                    return Self::reject(state, AdmissionError::InvalidTicket(TicketRejection::NotFound));
                };
                match ticket.status {
                    TicketStatus::Active | TicketStatus::Expired => {
                        let ticket_number = ticket.number.clone();
                        tracing::info!(%ticket_number, "Ticket cancelled");
                        Self::commit(state, env, TicketAction::TicketCancelled { ticket_number }, None)
                    },
                    TicketStatus::Cancelled => SmallVec::new(),
                    TicketStatus::Used => Self::reject(
                        state,
                        AdmissionError::InvalidStateTransition {
                            entity: "ticket",
                            from: TicketStatus::Used.as_str(),
                            to: TicketStatus::Cancelled.as_str(),
                        },
                    ),
                }
            },

            TicketAction::PersistenceFailed { error } => {
                tracing::error!(stream = STREAM, error = %error, "Ticket events were not persisted");
                SmallVec::new()
            },

            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}
