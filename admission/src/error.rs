//! Typed outcomes for every admission operation.
//!
//! All variants except [`AdmissionError::Unavailable`] and
//! [`AdmissionError::EventLog`] are expected, user-facing results (a full
//! day, a ticket presented on the wrong day) rather than defects.

use crate::types::{Category, EntryId, ReservationId, TicketNumber};
use chrono::NaiveDate;
use thiserror::Error;
use visitgate_runtime::StoreError;

/// Why the capacity ledger refused a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityRejection {
    /// Every slot of the day is taken.
    Full,
    /// The day is not an operating day for the category.
    Closed,
}

impl std::fmt::Display for CapacityRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a ticket could not be redeemed.
///
/// Checked in this order: not found, used or cancelled, wrong day.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TicketRejection {
    /// No ticket with that number exists.
    #[error("ticket not found")]
    NotFound,

    /// The ticket has already been redeemed.
    #[error("ticket already used")]
    AlreadyUsed,

    /// The ticket was cancelled with its reservation.
    #[error("ticket cancelled")]
    Cancelled,

    /// Tickets are valid on a single day only.
    #[error("ticket is valid on {valid_date}, not {today}")]
    WrongDay {
        /// The only day the ticket is valid.
        valid_date: NaiveDate,
        /// The day it was presented.
        today: NaiveDate,
    },

    /// The scanned payload does not carry a valid fingerprint.
    #[error("ticket payload has been tampered with")]
    Tampered,
}

/// Errors returned by the admission desk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The requester's cooldown for the category has not elapsed.
    #[error("requester is not eligible before {next_available}")]
    Ineligible {
        /// First day a new request will be accepted.
        next_available: NaiveDate,
    },

    /// The day has no room for the category.
    #[error("no capacity for {category} on {date} ({reason})")]
    NoCapacity {
        /// Requested date.
        date: NaiveDate,
        /// Requested category.
        category: Category,
        /// Full or closed.
        reason: CapacityRejection,
    },

    /// The requester already holds a reservation for this category and date.
    #[error("requester already holds a reservation for this category and date")]
    DuplicateReservation,

    /// The ticket cannot be redeemed.
    #[error("invalid ticket: {0}")]
    InvalidTicket(TicketRejection),

    /// The requested status change is not allowed from the current status.
    #[error("{entity} cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// Kind of record (`reservation`, `ticket`, `queue entry`).
        entity: &'static str,
        /// Current status.
        from: &'static str,
        /// Requested status.
        to: &'static str,
    },

    /// The ticket already has an open queue entry.
    #[error("ticket {0} is already in the queue")]
    AlreadyQueued(TicketNumber),

    /// Position and wait are only defined for waiting entries.
    #[error("queue entry is {status}, not waiting")]
    NotWaiting {
        /// Current status of the entry.
        status: &'static str,
    },

    /// No reservation with that id.
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// No queue entry with that id.
    #[error("queue entry {0} not found")]
    EntryNotFound(EntryId),

    /// The category is not configured.
    #[error("unknown category '{0}'")]
    UnknownCategory(Category),

    /// A capacity override below the number of slots already taken.
    #[error("capacity {requested} is below the {current} slots already reserved")]
    InvalidCapacity {
        /// Requested maximum.
        requested: u32,
        /// Slots already reserved.
        current: u32,
    },

    /// A time window whose start is not before its end.
    #[error("time window must start before it ends")]
    InvalidTimeWindow,

    /// No free ticket number was found within the configured attempts.
    #[error("no free ticket number for prefix {prefix}")]
    TicketNumbersExhausted {
        /// Category prefix that ran out.
        prefix: String,
    },

    /// A configuration value cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The aggregate store is not accepting commands.
    #[error("admission store unavailable: {0}")]
    Unavailable(#[from] StoreError),

    /// The durable event log could not be read back.
    #[error("event log error: {0}")]
    EventLog(String),
}

impl AdmissionError {
    /// Short label used for the `outcome` metric label.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Ineligible { .. } => "ineligible",
            Self::NoCapacity {
                reason: CapacityRejection::Full,
                ..
            } => "full",
            Self::NoCapacity {
                reason: CapacityRejection::Closed,
                ..
            } => "closed",
            Self::DuplicateReservation => "duplicate",
            Self::InvalidTicket(TicketRejection::NotFound) => "not_found",
            Self::InvalidTicket(TicketRejection::AlreadyUsed) => "already_used",
            Self::InvalidTicket(TicketRejection::Cancelled) => "cancelled",
            Self::InvalidTicket(TicketRejection::WrongDay { .. }) => "wrong_day",
            Self::InvalidTicket(TicketRejection::Tampered) => "tampered",
            Self::InvalidStateTransition { .. } | Self::AlreadyQueued(_) | Self::NotWaiting { .. } => {
                "invalid_transition"
            },
            Self::ReservationNotFound(_) | Self::EntryNotFound(_) | Self::UnknownCategory(_) => "not_found",
            Self::InvalidCapacity { .. } | Self::InvalidTimeWindow | Self::InvalidConfiguration(_) => "invalid",
            Self::TicketNumbersExhausted { .. } => "exhausted",
            Self::Unavailable(_) | Self::EventLog(_) => "unavailable",
        }
    }
}

impl From<TicketRejection> for AdmissionError {
    fn from(rejection: TicketRejection) -> Self {
        Self::InvalidTicket(rejection)
    }
}
