//! Notification events published for the external notifier.
//!
//! Every event goes to [`NOTIFICATION_TOPIC`]. Delivery and retries past the
//! bus belong to the notifier.

use crate::types::{CancelReason, Category, EntryId, RequesterId, ReservationId, StaffId, TicketNumber};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use visitgate_core::event::Event;

/// Topic for every admission notification.
pub const NOTIFICATION_TOPIC: &str = "visit-notifications";

/// A fact other systems may want to tell the visitor about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitEvent {
    /// A slot was granted
    SlotGranted {
        /// Reservation
        reservation_id: ReservationId,
        /// Requester
        requester_id: RequesterId,
        /// Category
        category: Category,
        /// Reserved day
        date: NaiveDate,
    },
    /// A reservation was cancelled or expired
    SlotReleased {
        /// Reservation
        reservation_id: ReservationId,
        /// Requester
        requester_id: RequesterId,
        /// Category
        category: Category,
        /// Day that was freed
        date: NaiveDate,
    },
    /// A ticket was issued for a reservation
    TicketIssued {
        /// Ticket number
        ticket_number: TicketNumber,
        /// Reservation
        reservation_id: ReservationId,
        /// Requester
        requester_id: RequesterId,
        /// The only valid day
        valid_date: NaiveDate,
    },
    /// A ticket was redeemed at check-in
    TicketRedeemed {
        /// Ticket number
        ticket_number: TicketNumber,
        /// Staff member
        redeemed_by: StaffId,
        /// Redemption time
        redeemed_at: DateTime<Utc>,
    },
    /// A visitor was called to the desk
    Called {
        /// Queue entry
        entry_id: EntryId,
        /// Ticket number shown on the display
        ticket_number: TicketNumber,
        /// Category
        category: Category,
    },
    /// Service started
    Served {
        /// Queue entry
        entry_id: EntryId,
        /// Ticket number
        ticket_number: TicketNumber,
    },
    /// Visit finished
    Completed {
        /// Queue entry
        entry_id: EntryId,
        /// Ticket number
        ticket_number: TicketNumber,
    },
    /// Visitor left the queue
    Cancelled {
        /// Queue entry
        entry_id: EntryId,
        /// Ticket number
        ticket_number: TicketNumber,
        /// Why
        reason: CancelReason,
    },
}

impl Event for VisitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::SlotGranted { .. } => "SlotGranted.v1",
            Self::SlotReleased { .. } => "SlotReleased.v1",
            Self::TicketIssued { .. } => "TicketIssued.v1",
            Self::TicketRedeemed { .. } => "TicketRedeemed.v1",
            Self::Called { .. } => "Called.v1",
            Self::Served { .. } => "Served.v1",
            Self::Completed { .. } => "Completed.v1",
            Self::Cancelled { .. } => "Cancelled.v1",
        }
    }
}
