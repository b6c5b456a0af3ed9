//! The admission desk: one store per aggregate and the flows across them.
//!
//! Every aggregate serializes its own commands. Flows that touch several
//! aggregates are short sagas: each step is one command, and a failed step
//! compensates the ones before it.
//!
//! ```text
//! request_slot:  Claim ─▶ TryReserve | RecordExempt ─▶ Confirm ─▶ IssueTicket
//!                  │          │ rejected                              │ failed
//!                  │          └─▶ Abandon                             └─▶ Cancel + Release
//! check_in:      Redeem ─▶ Consume ─▶ Enqueue
//! cancel:        CancelTicket ─▶ Cancel ─▶ Release
//! ```
//!
//! The ticket decides races between check-in and cancellation: `Redeem` and
//! `CancelTicket` run in the same store, so exactly one of them wins and
//! the loser stops before touching the reservation or the ledger.

use super::payload::RedemptionSigner;
use crate::aggregates::capacity::{self, LedgerAction, LedgerEnvironment, LedgerReducer, LedgerState, LedgerStore};
use crate::aggregates::queue::{self, QueueAction, QueueEnvironment, QueueReducer, QueueState, QueueStore};
use crate::aggregates::slots::{self, SlotAction, SlotEnvironment, SlotReducer, SlotState, SlotStore};
use crate::aggregates::tickets::{self, TicketAction, TicketEnvironment, TicketReducer, TicketState, TicketStore};
use crate::aggregates::{AggregateLog, CommandOutcome};
use crate::config::Config;
use crate::error::{AdmissionError, TicketRejection};
use crate::metrics;
use crate::types::{
    CancelReason, CapacityDay, Category, EntryId, QueueEntry, QueuePriority, RequesterId, ReservationId,
    SlotReservation, SlotStatus, StaffId, Ticket, TicketNumber, TimeWindow,
};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use visitgate_core::environment::Clock;
use visitgate_core::event_bus::EventBus;
use visitgate_core::event_store::EventStore;
use visitgate_core::reducer::Reducer;
use visitgate_runtime::store::Store;

/// A request approved upstream, asking for a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotRequest {
    /// Verified requester
    pub requester_id: RequesterId,
    /// Category
    pub category: Category,
    /// Day of the visit
    pub date: NaiveDate,
    /// Arrival window
    pub time_window: TimeWindow,
}

/// A granted slot with its ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotGrant {
    /// The reservation, `Reserved`
    pub reservation: SlotReservation,
    /// The ticket bound to it, `Active`
    pub ticket: Ticket,
    /// Scannable payload for the ticket
    pub redemption_payload: String,
}

/// Front door of the admission subsystem.
///
/// Cloning is cheap; clones share the same stores.
#[derive(Clone)]
pub struct AdmissionDesk {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    signer: RedemptionSigner,
    ledger: LedgerStore,
    slots: SlotStore,
    tickets: TicketStore,
    queue: QueueStore,
}

/// Aggregate states to start the stores from.
struct States {
    ledger: LedgerState,
    slots: SlotState,
    tickets: TicketState,
    queue: QueueState,
}

/// Send `action` and read the outcome under the same lock.
async fn command<S, A, E, R, T, F>(store: &Store<S, A, E, R>, action: A, read: F) -> Result<T, AdmissionError>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    S: CommandOutcome + Send + Sync + 'static,
    A: Send + 'static,
    E: Send + Sync + 'static,
    F: FnOnce(&S) -> T,
{
    store
        .send_and_read(action, |state| match state.last_error() {
            Some(error) => Err(error.clone()),
            None => Ok(read(state)),
        })
        .await?
}

impl AdmissionDesk {
    /// Desk with empty aggregates.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidConfiguration`] if the ticket secret is
    /// unusable.
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> Result<Self, AdmissionError> {
        let states = States {
            ledger: LedgerState::new(),
            slots: SlotState::new(),
            tickets: TicketState::new(),
            queue: QueueState::new(config.queue.service_sample_window),
        };
        Self::from_states(Arc::new(config), clock, event_store, event_bus, states)
    }

    /// Desk whose aggregates are rebuilt from their event streams.
    ///
    /// Reservations left behind by an interrupted `request_slot` are undone:
    /// pending claims are abandoned, reservations confirmed without a
    /// ticket are released, and capacity they hold goes back to the day.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::EventLog`] if a stream cannot be read or decoded,
    /// or any error of [`AdmissionDesk::new`].
    #[tracing::instrument(skip_all)]
    pub async fn rehydrate(
        config: Config,
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> Result<Self, AdmissionError> {
        let log = |stream| AggregateLog::new(event_store.clone(), event_bus.clone(), stream);

        let mut ledger = LedgerState::new();
        let ledger_events = log(capacity::STREAM)
            .replay(|event: &LedgerAction| LedgerReducer::apply_event(&mut ledger, event))
            .await?;

        let mut slots = SlotState::new();
        let slot_events = log(slots::STREAM)
            .replay(|event: &SlotAction| SlotReducer::apply_event(&mut slots, event))
            .await?;

        let mut tickets = TicketState::new();
        let ticket_events = log(tickets::STREAM)
            .replay(|event: &TicketAction| TicketReducer::apply_event(&mut tickets, event))
            .await?;

        let mut queue = QueueState::new(config.queue.service_sample_window);
        let queue_events = log(queue::STREAM)
            .replay(|event: &QueueAction| QueueReducer::apply_event(&mut queue, event))
            .await?;

        tracing::info!(
            ledger_events,
            slot_events,
            ticket_events,
            queue_events,
            reservations = slots.len(),
            tickets = tickets.len(),
            "Admission state rehydrated"
        );

        let interrupted: Vec<SlotReservation> = slots
            .pending_claims()
            .into_iter()
            .chain(
                slots
                    .reserved()
                    .filter(|r| tickets.ticket_for(r.id).is_none())
                    .cloned(),
            )
            .collect();
        let desk = Self::from_states(
            Arc::new(config),
            clock,
            event_store,
            event_bus,
            States {
                ledger,
                slots,
                tickets,
                queue,
            },
        )?;

        for reservation in interrupted {
            desk.undo_interrupted(reservation).await?;
        }

        Ok(desk)
    }

    async fn undo_interrupted(&self, reservation: SlotReservation) -> Result<(), AdmissionError> {
        let reservation_id = reservation.id;
        tracing::warn!(
            %reservation_id,
            status = reservation.status.as_str(),
            "Undoing a request interrupted before its ticket"
        );

        let undo = if reservation.status == SlotStatus::Pending {
            SlotAction::Abandon { reservation_id }
        } else {
            SlotAction::Cancel { reservation_id }
        };
        command(&self.slots, undo, |_| ()).await?;

        if self.ledger.state(|ledger| ledger.holds(reservation_id)).await {
            let action = self.release_action(reservation_id, reservation.date, reservation.category);
            command(&self.ledger, action, |_| ()).await?;
        }
        Ok(())
    }

    fn from_states(
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        states: States,
    ) -> Result<Self, AdmissionError> {
        let signer = RedemptionSigner::new(config.tickets.secret.as_bytes())?;
        let retry = config.persistence.retry_policy();
        let log = |stream| AggregateLog::new(event_store.clone(), event_bus.clone(), stream);

        let ledger = Store::with_retry_policy(
            states.ledger,
            LedgerReducer::new(),
            LedgerEnvironment::new(config.clone(), log(capacity::STREAM)),
            retry.clone(),
        );
        let slots = Store::with_retry_policy(
            states.slots,
            SlotReducer::new(),
            SlotEnvironment::new(config.clone(), clock.clone(), log(slots::STREAM)),
            retry.clone(),
        );
        let tickets = Store::with_retry_policy(
            states.tickets,
            TicketReducer::new(),
            TicketEnvironment::new(config.clone(), clock.clone(), log(tickets::STREAM)),
            retry.clone(),
        );
        let queue = Store::with_retry_policy(
            states.queue,
            QueueReducer::new(),
            QueueEnvironment::new(config.clone(), clock.clone(), log(queue::STREAM)),
            retry,
        );

        Ok(Self {
            config,
            clock,
            signer,
            ledger,
            slots,
            tickets,
            queue,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn is_exempt(&self, category: &Category) -> bool {
        self.config.category(category).is_some_and(|c| c.capacity_exempt)
    }

    fn release_action(&self, reservation_id: ReservationId, date: NaiveDate, category: Category) -> LedgerAction {
        if self.is_exempt(&category) {
            LedgerAction::ReleaseExempt {
                reservation_id,
                date,
                category,
            }
        } else {
            LedgerAction::Release {
                reservation_id,
                date,
                category,
            }
        }
    }

    // ========================================================================
    // Capacity
    // ========================================================================

    /// Capacity of `category` on `date`.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::UnknownCategory`].
    pub async fn availability(&self, date: NaiveDate, category: &Category) -> Result<CapacityDay, AdmissionError> {
        self.ledger
            .state(|ledger| ledger.availability(date, category, &self.config))
            .await
    }

    /// Capacity of `category` for `days` consecutive days from `from`.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::UnknownCategory`].
    pub async fn availability_range(
        &self,
        category: &Category,
        from: NaiveDate,
        days: usize,
    ) -> Result<Vec<CapacityDay>, AdmissionError> {
        self.ledger
            .state(|ledger| {
                from.iter_days()
                    .take(days)
                    .map(|date| ledger.availability(date, category, &self.config))
                    .collect()
            })
            .await
    }

    /// Open or close `date` for `category`.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::UnknownCategory`] or
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn set_operating_day(
        &self,
        date: NaiveDate,
        category: Category,
        open: bool,
    ) -> Result<CapacityDay, AdmissionError> {
        let action = LedgerAction::SetOperatingDay {
            date,
            category: category.clone(),
            open,
        };
        command(&self.ledger, action, |ledger| {
            ledger.availability(date, &category, &self.config)
        })
        .await?
    }

    /// Override the capacity of `category` on `date`.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidCapacity`] below the slots already taken,
    /// [`AdmissionError::UnknownCategory`] or
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn set_daily_capacity(
        &self,
        date: NaiveDate,
        category: Category,
        max_capacity: u32,
    ) -> Result<CapacityDay, AdmissionError> {
        let action = LedgerAction::SetDailyCapacity {
            date,
            category: category.clone(),
            max_capacity,
        };
        command(&self.ledger, action, |ledger| {
            ledger.availability(date, &category, &self.config)
        })
        .await?
    }

    // ========================================================================
    // Reservations
    // ========================================================================

    /// Reserve a slot and issue its ticket.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Ineligible`]: cooldown not elapsed
    /// - [`AdmissionError::DuplicateReservation`]: already holds this slot
    /// - [`AdmissionError::NoCapacity`]: day full or closed
    /// - [`AdmissionError::UnknownCategory`]
    /// - [`AdmissionError::TicketNumbersExhausted`]: the slot was released again
    /// - [`AdmissionError::Unavailable`]
    #[tracing::instrument(skip(self), fields(requester_id = %request.requester_id, category = %request.category, date = %request.date))]
    pub async fn request_slot(&self, request: SlotRequest) -> Result<SlotGrant, AdmissionError> {
        let result = self.run_slot_saga(request).await;
        match &result {
            Ok(grant) => {
                metrics::record_slot_outcome("granted");
                tracing::debug!(
                    reservation_id = %grant.reservation.id,
                    ticket_number = %grant.ticket.number,
                    "Slot request completed"
                );
            },
            Err(error) => {
                metrics::record_slot_outcome(error.outcome());
                tracing::debug!(error = %error, "Slot denied");
            },
        }
        result
    }

    async fn run_slot_saga(&self, request: SlotRequest) -> Result<SlotGrant, AdmissionError> {
        let SlotRequest {
            requester_id,
            category,
            date,
            time_window,
        } = request;
        let reservation_id = ReservationId::new();

        command(
            &self.slots,
            SlotAction::Claim {
                reservation_id,
                requester_id,
                category: category.clone(),
                date,
                time_window,
            },
            |_| (),
        )
        .await?;

        let reserve = if self.is_exempt(&category) {
            LedgerAction::RecordExempt {
                reservation_id,
                date,
                category: category.clone(),
            }
        } else {
            LedgerAction::TryReserve {
                reservation_id,
                date,
                category: category.clone(),
            }
        };
        if let Err(error) = command(&self.ledger, reserve, |_| ()).await {
            self.abandon_claim(reservation_id).await;
            return Err(error);
        }

        let confirmed = command(&self.slots, SlotAction::Confirm { reservation_id }, |slots| {
            slots.reservation(reservation_id).cloned()
        })
        .await;
        let reservation = match confirmed {
            Ok(Some(reservation)) => reservation,
            Ok(None) => {
                self.release_capacity(reservation_id, date, category).await;
                return Err(AdmissionError::ReservationNotFound(reservation_id));
            },
            Err(error) => {
                self.release_capacity(reservation_id, date, category.clone()).await;
                self.abandon_claim(reservation_id).await;
                return Err(error);
            },
        };

        let issued = command(
            &self.tickets,
            TicketAction::IssueTicket {
                reservation_id,
                requester_id,
                category: category.clone(),
                valid_date: date,
            },
            |tickets| tickets.ticket_for(reservation_id).cloned(),
        )
        .await
        .and_then(|ticket| ticket.ok_or(AdmissionError::ReservationNotFound(reservation_id)));
        let ticket = match issued {
            Ok(ticket) => ticket,
            Err(error) => {
                tracing::warn!(%reservation_id, error = %error, "Ticket issue failed, releasing the slot");
                if let Err(cancel_error) = command(&self.slots, SlotAction::Cancel { reservation_id }, |_| ()).await {
                    tracing::error!(%reservation_id, error = %cancel_error, "Failed to release reservation");
                }
                self.release_capacity(reservation_id, date, category).await;
                return Err(error);
            },
        };

        let redemption_payload = self.signer.sign(&ticket.number, ticket.valid_date);
        Ok(SlotGrant {
            reservation,
            ticket,
            redemption_payload,
        })
    }

    async fn abandon_claim(&self, reservation_id: ReservationId) {
        if let Err(error) = command(&self.slots, SlotAction::Abandon { reservation_id }, |_| ()).await {
            tracing::error!(%reservation_id, error = %error, "Failed to abandon claim");
        }
    }

    async fn release_capacity(&self, reservation_id: ReservationId, date: NaiveDate, category: Category) {
        let action = self.release_action(reservation_id, date, category);
        if let Err(error) = command(&self.ledger, action, |_| ()).await {
            tracing::error!(%date, error = %error, "Failed to release capacity");
        }
    }

    /// Cancel a reservation that has not been consumed.
    ///
    /// Cancels the bound ticket first, then releases the reservation and
    /// returns its capacity to the day. A ticket redeemed in the meantime
    /// leaves everything untouched.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::ReservationNotFound`]
    /// - [`AdmissionError::InvalidStateTransition`] unless the reservation is
    ///   `Reserved` and its ticket unused
    /// - [`AdmissionError::InvalidTicket`] with `NotFound` while the ticket
    ///   is still being issued
    /// - [`AdmissionError::Unavailable`]
    #[tracing::instrument(skip(self))]
    pub async fn cancel_reservation(&self, reservation_id: ReservationId) -> Result<SlotReservation, AdmissionError> {
        let current = self
            .reservation(reservation_id)
            .await
            .ok_or(AdmissionError::ReservationNotFound(reservation_id))?;
        if current.status != SlotStatus::Reserved {
            return Err(AdmissionError::InvalidStateTransition {
                entity: "reservation",
                from: current.status.as_str(),
                to: SlotStatus::Released.as_str(),
            });
        }

        command(&self.tickets, TicketAction::CancelTicket { reservation_id }, |_| ()).await?;

        let reservation = command(&self.slots, SlotAction::Cancel { reservation_id }, |slots| {
            slots.reservation(reservation_id).cloned()
        })
        .await?
        .ok_or(AdmissionError::ReservationNotFound(reservation_id))?;

        command(
            &self.ledger,
            self.release_action(reservation_id, reservation.date, reservation.category.clone()),
            |_| (),
        )
        .await?;

        Ok(reservation)
    }

    /// Cancel every `Reserved` reservation dated before `today`.
    ///
    /// Reservations consumed while the sweep runs are skipped.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn expire_stale_reservations(&self, today: NaiveDate) -> Result<Vec<ReservationId>, AdmissionError> {
        let stale = self.slots.state(|slots| slots.stale_reserved(today)).await;

        let mut expired = Vec::with_capacity(stale.len());
        for reservation in stale {
            match self.cancel_reservation(reservation.id).await {
                Ok(_) => expired.push(reservation.id),
                Err(
                    AdmissionError::InvalidStateTransition { .. }
                    | AdmissionError::InvalidTicket(TicketRejection::NotFound),
                ) => {
                    tracing::debug!(reservation_id = %reservation.id, "Reservation changed during the sweep");
                },
                Err(error) => return Err(error),
            }
        }

        if !expired.is_empty() {
            tracing::info!(%today, expired = expired.len(), "Stale reservations expired");
        }
        Ok(expired)
    }

    // ========================================================================
    // Check-in
    // ========================================================================

    /// Redeem a ticket and put the visitor in the queue.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidTicket`] with the reason (not found,
    /// already used, cancelled, wrong day), or
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self, ticket_number), fields(ticket_number = %ticket_number))]
    pub async fn check_in(
        &self,
        ticket_number: TicketNumber,
        staff: StaffId,
        priority: QueuePriority,
    ) -> Result<QueueEntry, AdmissionError> {
        let redeemed = command(
            &self.tickets,
            TicketAction::Redeem {
                ticket_number: ticket_number.clone(),
                redeemed_by: staff,
            },
            |tickets| tickets.ticket(&ticket_number).cloned(),
        )
        .await
        .and_then(|ticket| ticket.ok_or(AdmissionError::InvalidTicket(TicketRejection::NotFound)));
        let ticket = match redeemed {
            Ok(ticket) => ticket,
            Err(error) => {
                metrics::record_redemption(error.outcome());
                return Err(error);
            },
        };
        metrics::record_redemption("redeemed");

        if let Err(error) = command(
            &self.slots,
            SlotAction::Consume {
                reservation_id: ticket.reservation_id,
            },
            |_| (),
        )
        .await
        {
            // Only a stopped store gets here: cancellation cannot pass a used ticket
            tracing::error!(reservation_id = %ticket.reservation_id, error = %error, "Redeemed ticket left its reservation unconsumed");
            return Err(error);
        }

        let entry_id = EntryId::new();
        let (entry, waiting) = command(
            &self.queue,
            QueueAction::Enqueue {
                entry_id,
                ticket_number: ticket.number.clone(),
                reservation_id: ticket.reservation_id,
                category: ticket.category.clone(),
                service_date: ticket.valid_date,
                priority,
            },
            |queue| (queue.entry(entry_id).cloned(), queue.waiting_count()),
        )
        .await?;
        let entry = entry.ok_or(AdmissionError::EntryNotFound(entry_id))?;

        metrics::record_queue_transition("waiting");
        metrics::update_queue_waiting(waiting);
        tracing::info!(%entry_id, %staff, "Visitor checked in");
        Ok(entry)
    }

    /// Verify a scanned payload, then [`AdmissionDesk::check_in`].
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidTicket`] with `Tampered` for a forged or
    /// malformed payload, or any error of [`AdmissionDesk::check_in`].
    #[tracing::instrument(skip(self, payload))]
    pub async fn check_in_with_payload(
        &self,
        payload: &str,
        staff: StaffId,
        priority: QueuePriority,
    ) -> Result<QueueEntry, AdmissionError> {
        let (ticket_number, _) = self.signer.verify(payload).inspect_err(|error| {
            tracing::warn!(error = %error, "Rejected redemption payload");
            metrics::record_redemption(error.outcome());
        })?;
        self.check_in(ticket_number, staff, priority).await
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Call the next visitor of `category` waiting today.
    ///
    /// Returns `None` right away when nobody is waiting.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn call_next(&self, category: Category) -> Result<Option<QueueEntry>, AdmissionError> {
        let (called, waiting) = command(&self.queue, QueueAction::CallNext { category }, |queue| {
            (
                queue.last_called.and_then(|id| queue.entry(id).cloned()),
                queue.waiting_count(),
            )
        })
        .await?;

        if let Some(entry) = &called {
            metrics::record_queue_transition("called");
            metrics::update_queue_waiting(waiting);
            if let Some(called_at) = entry.called_at {
                #[allow(clippy::cast_precision_loss)] // milliseconds of a single day
                let waited = (called_at - entry.join_order.joined_at).num_milliseconds() as f64 / 1000.0;
                metrics::record_queue_wait(waited);
            }
        }
        Ok(called)
    }

    async fn transition(&self, action: QueueAction, entry_id: EntryId, status: &'static str) -> Result<QueueEntry, AdmissionError> {
        let (entry, waiting) = command(&self.queue, action, |queue| {
            (queue.entry(entry_id).cloned(), queue.waiting_count())
        })
        .await?;
        let entry = entry.ok_or(AdmissionError::EntryNotFound(entry_id))?;

        metrics::record_queue_transition(status);
        metrics::update_queue_waiting(waiting);
        Ok(entry)
    }

    /// Start serving a called entry.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidStateTransition`] unless the entry is
    /// `Called`, [`AdmissionError::EntryNotFound`] or
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn mark_served(&self, entry_id: EntryId) -> Result<QueueEntry, AdmissionError> {
        self.transition(QueueAction::MarkServed { entry_id }, entry_id, "served")
            .await
    }

    /// Finish serving an entry.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidStateTransition`] unless the entry is
    /// `Served`, [`AdmissionError::EntryNotFound`] or
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn mark_completed(&self, entry_id: EntryId) -> Result<QueueEntry, AdmissionError> {
        self.transition(QueueAction::MarkCompleted { entry_id }, entry_id, "completed")
            .await
    }

    /// Take a waiting or called entry out of the queue.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidStateTransition`] for served or closed
    /// entries, [`AdmissionError::EntryNotFound`] or
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn cancel_entry(&self, entry_id: EntryId, reason: CancelReason) -> Result<QueueEntry, AdmissionError> {
        self.transition(QueueAction::Cancel { entry_id, reason }, entry_id, "cancelled")
            .await
    }

    /// Mark every open entry of `date` as a no-show.
    ///
    /// Returns the number of no-shows recorded for the day.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Unavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn close_day(&self, date: NaiveDate) -> Result<usize, AdmissionError> {
        let (no_shows, waiting) = command(&self.queue, QueueAction::CloseDay { date }, |queue| {
            (queue.no_shows(date), queue.waiting_count())
        })
        .await?;
        metrics::update_queue_waiting(waiting);
        Ok(no_shows)
    }

    /// 1-based position of a waiting entry.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::EntryNotFound`] or [`AdmissionError::NotWaiting`].
    pub async fn position(&self, entry_id: EntryId) -> Result<usize, AdmissionError> {
        self.queue.state(|queue| queue.position(entry_id)).await
    }

    /// Expected time until a waiting entry is called.
    ///
    /// # Errors
    ///
    /// Same as [`AdmissionDesk::position`].
    pub async fn estimated_wait(&self, entry_id: EntryId) -> Result<Duration, AdmissionError> {
        self.queue
            .state(|queue| queue.estimated_wait(entry_id, &self.config))
            .await
    }

    /// Today's waiting entries of `category`, in call order.
    pub async fn waiting_entries(&self, category: &Category) -> Vec<QueueEntry> {
        let today = self.clock.today();
        self.queue
            .state(|queue| queue.waiting_entries(category, today))
            .await
    }

    /// Most recently called entry of `category`.
    pub async fn now_serving(&self, category: &Category) -> Option<QueueEntry> {
        self.queue
            .state(|queue| queue.now_serving(category).cloned())
            .await
    }

    /// Queue entry by id.
    pub async fn entry(&self, entry_id: EntryId) -> Option<QueueEntry> {
        self.queue.state(|queue| queue.entry(entry_id).cloned()).await
    }

    // ========================================================================
    // Lookups and lifecycle
    // ========================================================================

    /// Ticket by number.
    pub async fn ticket(&self, ticket_number: &TicketNumber) -> Option<Ticket> {
        self.tickets
            .state(|tickets| tickets.ticket(ticket_number).cloned())
            .await
    }

    /// Reservation by id.
    pub async fn reservation(&self, reservation_id: ReservationId) -> Option<SlotReservation> {
        self.slots
            .state(|slots| slots.reservation(reservation_id).cloned())
            .await
    }

    /// Wait until every pending append and publication has finished.
    pub async fn settle(&self) {
        self.ledger.settle().await;
        self.slots.settle().await;
        self.tickets.settle().await;
        self.queue.settle().await;
    }

    /// Stop accepting commands and flush every store.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Unavailable`] if a store still has effects running
    /// after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), AdmissionError> {
        self.ledger.shutdown(timeout).await?;
        self.slots.shutdown(timeout).await?;
        self.tickets.shutdown(timeout).await?;
        self.queue.shutdown(timeout).await?;
        tracing::info!("Admission desk shut down");
        Ok(())
    }
}
