//! Visit admission control for a walk-in service desk.
//!
//! Requesters reserve a slot for a day and category, get a single-day
//! ticket, redeem it at check-in and wait in a live queue until staff call
//! them.
//!
//! - **Eligibility**: per-category cooldown between visits
//! - **Capacity ledger**: per (date, category) counters that never oversell
//! - **Slot allocator**: reservations and the duplicate check
//! - **Credential issuer**: ticket numbers, signed payloads, single-use redemption
//! - **Queue manager**: FIFO within priority tiers, derived positions, wait estimates
//!
//! # Architecture
//!
//! ```text
//!                          ┌──────────────────┐
//!   approval workflow ───▶ │  AdmissionDesk   │ ◀─── front desk / scanner
//!                          └──────────────────┘
//!                 ┌──────────┬─────┴─────┬──────────┐
//!                 ▼          ▼           ▼          ▼
//!           ┌──────────┐┌──────────┐┌──────────┐┌──────────┐
//!           │ Capacity ││  Slots   ││ Tickets  ││  Queue   │   one Store each
//!           └──────────┘└──────────┘└──────────┘└──────────┘
//!                 │          │           │          │
//!                 └──────────┴─────┬─────┴──────────┘
//!                                  ▼
//!                   EventStore (streams) + EventBus (notifications)
//! ```
//!
//! Each aggregate is a reducer in its own store, so every command on it is
//! linearizable: two requests for the last slot of a day, or two scans of
//! the same ticket, are decided one after the other.
//!
//! # Usage
//!
//! ```ignore
//! let desk = AdmissionDesk::new(Config::from_env(), clock, event_store, event_bus)?;
//!
//! let grant = desk.request_slot(SlotRequest { requester_id, category, date, time_window }).await?;
//! let entry = desk.check_in_with_payload(&grant.redemption_payload, staff, QueuePriority::Standard).await?;
//! let position = desk.position(entry.id).await?;
//! ```

pub mod aggregates;
pub mod app;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod metrics;
pub mod types;

pub use app::{AdmissionDesk, RedemptionSigner, SlotGrant, SlotRequest};
pub use config::Config;
pub use error::{AdmissionError, CapacityRejection, TicketRejection};
pub use events::{NOTIFICATION_TOPIC, VisitEvent};
pub use types::*;
