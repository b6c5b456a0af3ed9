//! A day at a small food desk, from reservation to completed visit.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use admission::{
    AdmissionError, CapacityRejection, Category, NOTIFICATION_TOPIC, QueuePriority, QueueStatus, RequesterId,
    StaffId, TicketRejection, TicketStatus,
};
use common::{config, eight_am, food_request, harness, monday, monday_plus, request};
use std::time::Duration;

#[tokio::test]
async fn two_slots_one_visit_one_late_ticket() {
    let h = harness(config(2));
    let food = Category::food();
    let staff = StaffId::new();

    let x = h.desk.request_slot(food_request(monday())).await.unwrap();
    assert_eq!(h.desk.availability(monday(), &food).await.unwrap().current_count, 1);

    let y = h.desk.request_slot(food_request(monday())).await.unwrap();
    assert_eq!(h.desk.availability(monday(), &food).await.unwrap().current_count, 2);

    let z = h.desk.request_slot(food_request(monday())).await;
    assert!(matches!(
        z,
        Err(AdmissionError::NoCapacity {
            reason: CapacityRejection::Full,
            ..
        })
    ));

    let entry = h
        .desk
        .check_in(x.ticket.number.clone(), staff, QueuePriority::Standard)
        .await
        .unwrap();
    assert_eq!(entry.status, QueueStatus::Waiting);
    assert_eq!(h.desk.position(entry.id).await.unwrap(), 1);

    h.clock.advance_days(1);
    let late = h
        .desk
        .check_in(y.ticket.number.clone(), staff, QueuePriority::Standard)
        .await;
    assert_eq!(
        late,
        Err(AdmissionError::InvalidTicket(TicketRejection::WrongDay {
            valid_date: monday(),
            today: monday_plus(1),
        }))
    );

    let called = h.desk.call_next(food.clone()).await.unwrap().unwrap();
    assert_eq!(called.id, entry.id);
    assert_eq!(called.status, QueueStatus::Called);
    assert!(called.called_at.is_some());

    assert_eq!(h.desk.mark_served(entry.id).await.unwrap().status, QueueStatus::Served);
    assert_eq!(h.desk.mark_completed(entry.id).await.unwrap().status, QueueStatus::Completed);

    let y_ticket = h.desk.ticket(&y.ticket.number).await.unwrap();
    assert_eq!(y_ticket.effective_status(monday_plus(1)), TicketStatus::Expired);
    assert!(matches!(
        h.desk.check_in(y.ticket.number.clone(), staff, QueuePriority::Standard).await,
        Err(AdmissionError::InvalidTicket(TicketRejection::WrongDay { .. }))
    ));

    // each aggregate publishes in order; across aggregates only the set is fixed
    h.desk.settle().await;
    let mut published = h.bus.published_types(NOTIFICATION_TOPIC);
    published.sort_unstable();
    assert_eq!(
        published,
        vec![
            "Called.v1",
            "Completed.v1",
            "Served.v1",
            "SlotGranted.v1",
            "SlotGranted.v1",
            "TicketIssued.v1",
            "TicketIssued.v1",
            "TicketRedeemed.v1",
        ]
    );
}

#[tokio::test]
async fn cooldown_runs_from_the_consumed_visit() {
    let h = harness(config(10));
    let requester = RequesterId::new();
    let food = Category::food();

    let first = h.desk.request_slot(request(requester, food.clone(), monday())).await.unwrap();
    h.desk
        .check_in(first.ticket.number, StaffId::new(), QueuePriority::Standard)
        .await
        .unwrap();

    h.clock.set(eight_am(monday_plus(6)));
    let too_soon = h.desk.request_slot(request(requester, food.clone(), monday_plus(6))).await;
    assert_eq!(
        too_soon,
        Err(AdmissionError::Ineligible {
            next_available: monday_plus(7)
        })
    );

    h.clock.set(eight_am(monday_plus(7)));
    assert!(h.desk.request_slot(request(requester, food, monday_plus(7))).await.is_ok());
}

#[tokio::test]
async fn booking_ahead_cannot_stack_visits_inside_the_cooldown() {
    let h = harness(config(10));
    let requester = RequesterId::new();
    let food = Category::food();

    let monday_grant = h.desk.request_slot(request(requester, food.clone(), monday())).await.unwrap();
    let tuesday = h.desk.request_slot(request(requester, food.clone(), monday_plus(1))).await;
    assert_eq!(
        tuesday,
        Err(AdmissionError::Ineligible {
            next_available: monday_plus(7)
        })
    );

    h.desk
        .check_in(monday_grant.ticket.number, StaffId::new(), QueuePriority::Standard)
        .await
        .unwrap();
    h.clock.advance_days(1);
    assert!(matches!(
        h.desk.request_slot(request(requester, food.clone(), monday_plus(1))).await,
        Err(AdmissionError::Ineligible { .. })
    ));

    // a slot a full cooldown ahead is fine
    assert!(h.desk.request_slot(request(requester, food, monday_plus(7))).await.is_ok());
}

#[tokio::test]
async fn other_categories_have_their_own_cooldown() {
    let h = harness(config(10));
    let requester = RequesterId::new();

    let food = h.desk.request_slot(request(requester, Category::food(), monday())).await.unwrap();
    h.desk
        .check_in(food.ticket.number, StaffId::new(), QueuePriority::Standard)
        .await
        .unwrap();

    let general = h
        .desk
        .request_slot(request(requester, Category::general(), monday_plus(1)))
        .await;
    assert!(general.is_ok());
}

#[tokio::test]
async fn priority_visitors_are_called_first_and_waits_shrink() {
    let h = harness(config(10));
    let food = Category::food();
    let staff = StaffId::new();

    let mut standard = Vec::new();
    for _ in 0..3 {
        let grant = h.desk.request_slot(food_request(monday())).await.unwrap();
        standard.push(
            h.desk
                .check_in(grant.ticket.number, staff, QueuePriority::Standard)
                .await
                .unwrap(),
        );
    }
    let grant = h.desk.request_slot(food_request(monday())).await.unwrap();
    let priority = h
        .desk
        .check_in(grant.ticket.number, staff, QueuePriority::Priority)
        .await
        .unwrap();

    // position follows arrival; the wait counts the priority visitor called first
    assert_eq!(h.desk.position(standard[2].id).await.unwrap(), 3);
    assert_eq!(h.desk.position(priority.id).await.unwrap(), 4);
    // no samples yet: 10 minutes per visitor called before
    assert_eq!(
        h.desk.estimated_wait(standard[2].id).await.unwrap(),
        Duration::from_secs(30 * 60)
    );
    assert_eq!(h.desk.estimated_wait(priority.id).await.unwrap(), Duration::ZERO);

    let first = h.desk.call_next(food.clone()).await.unwrap().unwrap();
    assert_eq!(first.id, priority.id);
    assert_eq!(h.desk.now_serving(&food).await.map(|e| e.id), Some(priority.id));

    h.desk.mark_served(first.id).await.unwrap();
    h.clock.advance(chrono::Duration::minutes(5));
    h.desk.mark_completed(first.id).await.unwrap();

    assert_eq!(
        h.desk.estimated_wait(standard[2].id).await.unwrap(),
        Duration::from_secs(2 * 5 * 60)
    );

    let order: Vec<_> = h.desk.waiting_entries(&food).await.into_iter().map(|e| e.id).collect();
    assert_eq!(order, standard.iter().map(|e| e.id).collect::<Vec<_>>());
}

#[tokio::test]
async fn closing_the_day_marks_no_shows() {
    let h = harness(config(10));
    let food = Category::food();
    let staff = StaffId::new();

    let mut entries = Vec::new();
    for _ in 0..3 {
        let grant = h.desk.request_slot(food_request(monday())).await.unwrap();
        entries.push(
            h.desk
                .check_in(grant.ticket.number, staff, QueuePriority::Standard)
                .await
                .unwrap(),
        );
    }
    let called = h.desk.call_next(food.clone()).await.unwrap().unwrap();
    h.desk.mark_served(called.id).await.unwrap();

    assert_eq!(h.desk.close_day(monday()).await.unwrap(), 2);
    assert!(h.desk.waiting_entries(&food).await.is_empty());
    assert_eq!(
        h.desk.position(entries[1].id).await,
        Err(AdmissionError::NotWaiting { status: "cancelled" })
    );
    assert_eq!(h.desk.entry(called.id).await.unwrap().status, QueueStatus::Served);
}

#[tokio::test]
async fn visitor_leaving_the_queue_moves_others_up() {
    let h = harness(config(10));
    let staff = StaffId::new();

    let mut entries = Vec::new();
    for _ in 0..3 {
        let grant = h.desk.request_slot(food_request(monday())).await.unwrap();
        entries.push(
            h.desk
                .check_in(grant.ticket.number, staff, QueuePriority::Standard)
                .await
                .unwrap(),
        );
    }

    h.desk
        .cancel_entry(entries[0].id, admission::CancelReason::LeftQueue)
        .await
        .unwrap();
    assert_eq!(h.desk.position(entries[1].id).await.unwrap(), 1);
    assert_eq!(h.desk.position(entries[2].id).await.unwrap(), 2);

    let again = h
        .desk
        .cancel_entry(entries[0].id, admission::CancelReason::LeftQueue)
        .await;
    assert!(matches!(again, Err(AdmissionError::InvalidStateTransition { .. })));
}

#[tokio::test]
async fn closed_days_and_overrides() {
    let h = harness(config(2));
    let food = Category::food();
    let sunday = monday_plus(6);

    let closed = h.desk.request_slot(food_request(sunday)).await;
    assert!(matches!(
        closed,
        Err(AdmissionError::NoCapacity {
            reason: CapacityRejection::Closed,
            ..
        })
    ));

    h.desk.set_operating_day(sunday, food.clone(), true).await.unwrap();
    h.desk.set_daily_capacity(sunday, food.clone(), 1).await.unwrap();
    assert!(h.desk.request_slot(food_request(sunday)).await.is_ok());

    assert_eq!(
        h.desk.set_daily_capacity(sunday, food.clone(), 0).await,
        Err(AdmissionError::InvalidCapacity { requested: 0, current: 1 })
    );

    let week = h.desk.availability_range(&food, monday(), 7).await.unwrap();
    assert_eq!(week.len(), 7);
    assert_eq!(week[6].remaining(), 0);
    assert_eq!(week[0].remaining(), 2);
}
