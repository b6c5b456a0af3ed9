//! Domain types for visit admission.
//!
//! Identifiers, value objects and the four record types owned by the
//! aggregates: [`CapacityDay`], [`SlotReservation`], [`Ticket`] and
//! [`QueueEntry`].

use crate::error::AdmissionError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// A verified requester, supplied by the identity collaborator
    RequesterId
);
uuid_id!(
    /// Unique identifier for a slot reservation
    ReservationId
);
uuid_id!(
    /// Unique identifier for a queue entry
    EntryId
);
uuid_id!(
    /// Staff member redeeming tickets at the desk
    StaffId
);

/// A service category (`food`, `general`, `emergency`, ...).
///
/// Names are trimmed and lower-cased so `"Food "` and `"food"` are the
/// same category.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Category(String);

impl Category {
    /// Normalize a category name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// Food assistance.
    #[must_use]
    pub fn food() -> Self {
        Self::new("food")
    }

    /// General support.
    #[must_use]
    pub fn general() -> Self {
        Self::new("general")
    }

    /// Emergency assistance.
    #[must_use]
    pub fn emergency() -> Self {
        Self::new("emergency")
    }

    /// The normalized name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable ticket number: `{PREFIX}-{YEAR}-{SEQUENCE:06}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketNumber(String);

impl TicketNumber {
    /// Build a number from its parts.
    #[must_use]
    pub fn format(prefix: &str, year: i32, sequence: u32) -> Self {
        Self(format!("{prefix}-{year}-{sequence:06}"))
    }

    /// Wrap a number typed in by staff (trimmed, upper-cased).
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// Borrow the number.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arrival window within the reserved day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimeWindowFields")]
pub struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

/// Unchecked wire form of [`TimeWindow`].
#[derive(Deserialize)]
struct TimeWindowFields {
    start: NaiveTime,
    end: NaiveTime,
}

impl TryFrom<TimeWindowFields> for TimeWindow {
    type Error = AdmissionError;

    fn try_from(fields: TimeWindowFields) -> Result<Self, Self::Error> {
        Self::new(fields.start, fields.end)
    }
}

impl TimeWindow {
    /// Create a window.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidTimeWindow`] unless `start < end`.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, AdmissionError> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(AdmissionError::InvalidTimeWindow)
        }
    }

    /// Window start.
    #[must_use]
    pub const fn start(&self) -> NaiveTime {
        self.start
    }

    /// Window end.
    #[must_use]
    pub const fn end(&self) -> NaiveTime {
        self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

// ============================================================================
// Capacity
// ============================================================================

/// Counters for one (date, category).
///
/// `current_count <= max_capacity` always holds. Reservations in
/// capacity-exempt categories are tracked in `exempt_count` only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityDay {
    /// Service date
    pub date: NaiveDate,
    /// Category
    pub category: Category,
    /// Slots available for the day
    pub max_capacity: u32,
    /// Slots taken
    pub current_count: u32,
    /// Exempt reservations recorded for reporting
    pub exempt_count: u32,
    /// Closed days accept no reservations
    pub is_operating_day: bool,
}

impl CapacityDay {
    /// Slots still free (0 on closed days).
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        if self.is_operating_day {
            self.max_capacity.saturating_sub(self.current_count)
        } else {
            0
        }
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// Lifecycle of a [`SlotReservation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    /// Claimed, capacity decision outstanding. Never returned to callers.
    Pending,
    /// Holds capacity, ticket not yet redeemed
    Reserved,
    /// Ticket redeemed
    Consumed,
    /// Cancelled or expired; capacity returned
    Released,
}

impl SlotStatus {
    /// Status name for messages and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reserved => "reserved",
            Self::Consumed => "consumed",
            Self::Released => "released",
        }
    }

    /// Counts toward the duplicate check.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Released)
    }
}

/// One admission decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReservation {
    /// Reservation id
    pub id: ReservationId,
    /// Requester
    pub requester_id: RequesterId,
    /// Category
    pub category: Category,
    /// Reserved day
    pub date: NaiveDate,
    /// Arrival window
    pub time_window: TimeWindow,
    /// Current status
    pub status: SlotStatus,
    /// When the claim was made
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Tickets
// ============================================================================

/// Stored ticket status. `Expired` is derived, see [`Ticket::effective_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Redeemable on its valid date
    Active,
    /// Redeemed
    Used,
    /// Cancelled with its reservation
    Cancelled,
    /// Valid date has passed without redemption
    Expired,
}

impl TicketStatus {
    /// Status name for messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// Redeemable visit credential, bound 1:1 to a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Globally unique number
    pub number: TicketNumber,
    /// Reservation the ticket was issued for
    pub reservation_id: ReservationId,
    /// Requester
    pub requester_id: RequesterId,
    /// Category
    pub category: Category,
    /// The only day the ticket can be redeemed
    pub valid_date: NaiveDate,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Stored status (`Active`, `Used` or `Cancelled`)
    pub status: TicketStatus,
    /// Redemption time
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Staff member who redeemed it
    pub redeemed_by: Option<StaffId>,
}

impl Ticket {
    /// Status as seen on `today`: an active ticket past its date is expired.
    #[must_use]
    pub fn effective_status(&self, today: NaiveDate) -> TicketStatus {
        match self.status {
            TicketStatus::Active if today > self.valid_date => TicketStatus::Expired,
            status => status,
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Queue tier. Priority entries are called before standard ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueuePriority {
    /// Called ahead of standard entries
    Priority,
    /// Normal order
    #[default]
    Standard,
}

/// Total order of arrivals: timestamp, then insertion sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JoinOrder {
    /// Check-in time
    pub joined_at: DateTime<Utc>,
    /// Monotonic per queue; breaks timestamp ties
    pub sequence: u64,
}

/// Why an entry left the queue early.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// The visitor left
    LeftQueue,
    /// The visitor did not show up when called or the day closed
    NoShow,
    /// Removed by staff
    Staff(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeftQueue => write!(f, "left queue"),
            Self::NoShow => write!(f, "no show"),
            Self::Staff(note) => write!(f, "staff: {note}"),
        }
    }
}

/// Lifecycle of a [`QueueEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueStatus {
    /// In line
    Waiting,
    /// Called to the desk
    Called,
    /// Being served
    Served,
    /// Visit finished
    Completed,
    /// Left early, see `cancel_reason`
    Cancelled,
}

impl QueueStatus {
    /// Status name for messages and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Called => "called",
            Self::Served => "served",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `Waiting` or `Called`.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Waiting | Self::Called)
    }
}

/// A checked-in visitor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Entry id
    pub id: EntryId,
    /// Redeemed ticket
    pub ticket_number: TicketNumber,
    /// Reservation behind the ticket
    pub reservation_id: ReservationId,
    /// Category
    pub category: Category,
    /// Day of service
    pub service_date: NaiveDate,
    /// Tier
    pub priority: QueuePriority,
    /// Arrival order
    pub join_order: JoinOrder,
    /// Called to the desk
    pub called_at: Option<DateTime<Utc>>,
    /// Service started
    pub served_at: Option<DateTime<Utc>>,
    /// Visit finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Left early
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Why it left early
    pub cancel_reason: Option<CancelReason>,
    /// Current status
    pub status: QueueStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_are_normalized() {
        assert_eq!(Category::new("  Food "), Category::food());
        assert_eq!(Category::emergency().as_str(), "emergency");
    }

    #[test]
    fn ticket_numbers_are_zero_padded() {
        assert_eq!(TicketNumber::format("FD", 2025, 42).as_str(), "FD-2025-000042");
        assert_eq!(TicketNumber::parse(" fd-2025-000042"), TicketNumber::format("FD", 2025, 42));
    }

    #[test]
    fn time_window_must_be_ordered() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default();
        let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default();
        assert!(TimeWindow::new(nine, ten).is_ok());
        assert_eq!(TimeWindow::new(ten, nine), Err(AdmissionError::InvalidTimeWindow));
        assert_eq!(TimeWindow::new(ten, ten), Err(AdmissionError::InvalidTimeWindow));
    }

    #[test]
    fn reversed_window_does_not_deserialize() {
        let ok: Result<TimeWindow, _> = serde_json::from_str(r#"{"start":"09:00:00","end":"10:00:00"}"#);
        assert_eq!(ok.map(|w| w.end()).ok(), NaiveTime::from_hms_opt(10, 0, 0));

        let reversed: Result<TimeWindow, _> = serde_json::from_str(r#"{"start":"10:00:00","end":"09:00:00"}"#);
        let message = reversed.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains(&AdmissionError::InvalidTimeWindow.to_string()));
    }

    #[test]
    fn active_ticket_expires_after_its_day() {
        let valid_date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap_or_default();
        let ticket = Ticket {
            number: TicketNumber::format("FD", 2025, 1),
            reservation_id: ReservationId::new(),
            requester_id: RequesterId::new(),
            category: Category::food(),
            valid_date,
            issued_at: Utc::now(),
            status: TicketStatus::Active,
            redeemed_at: None,
            redeemed_by: None,
        };
        assert_eq!(ticket.effective_status(valid_date), TicketStatus::Active);
        assert_eq!(
            ticket.effective_status(valid_date.succ_opt().unwrap_or(valid_date)),
            TicketStatus::Expired
        );
    }

    #[test]
    fn closed_days_have_no_room() {
        let day = CapacityDay {
            date: NaiveDate::default(),
            category: Category::food(),
            max_capacity: 5,
            current_count: 2,
            exempt_count: 0,
            is_operating_day: false,
        };
        assert_eq!(day.remaining(), 0);
    }
}
