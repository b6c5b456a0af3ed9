//! Races on the last slots of a day, on a single ticket and between
//! check-in and cancellation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use admission::{
    AdmissionError, CapacityRejection, Category, QueuePriority, RequesterId, SlotStatus, StaffId, TicketRejection,
    TicketStatus,
};
use common::{config, food_request, harness, monday, request};
use futures::future::join_all;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_slots_go_to_exactly_that_many_requesters() {
    let h = harness(config(5));

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let desk = h.desk.clone();
            tokio::spawn(async move { desk.request_slot(food_request(monday())).await })
        })
        .collect();

    let mut granted = 0;
    let mut full = 0;
    for outcome in join_all(handles).await {
        match outcome.unwrap() {
            Ok(_) => granted += 1,
            Err(AdmissionError::NoCapacity {
                reason: CapacityRejection::Full,
                ..
            }) => full += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 5);
    assert_eq!(full, 35);
    let day = h.desk.availability(monday(), &Category::food()).await.unwrap();
    assert_eq!(day.current_count, 5);
    assert_eq!(day.remaining(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_redeem_a_ticket_once() {
    let h = harness(config(5));
    let grant = h.desk.request_slot(food_request(monday())).await.unwrap();
    let staff = StaffId::new();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let desk = h.desk.clone();
            let number = grant.ticket.number.clone();
            tokio::spawn(async move { desk.check_in(number, staff, QueuePriority::Standard).await })
        })
        .collect();

    let mut admitted = Vec::new();
    let mut already_used = 0;
    for outcome in join_all(handles).await {
        match outcome.unwrap() {
            Ok(entry) => admitted.push(entry),
            Err(AdmissionError::InvalidTicket(TicketRejection::AlreadyUsed)) => already_used += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(admitted.len(), 1);
    assert_eq!(already_used, 19);
    assert_eq!(h.desk.position(admitted[0].id).await.unwrap(), 1);
    assert_eq!(h.desk.waiting_entries(&Category::food()).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_requester_racing_itself_gets_one_slot() {
    let h = harness(config(5));
    let requester = RequesterId::new();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let desk = h.desk.clone();
            tokio::spawn(async move {
                desk.request_slot(request(requester, Category::food(), monday()))
                    .await
            })
        })
        .collect();

    let outcomes: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|o| o.as_ref().err())
            .all(|e| *e == AdmissionError::DuplicateReservation)
    );
    let day = h.desk.availability(monday(), &Category::food()).await.unwrap();
    assert_eq!(day.current_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_check_ins_get_distinct_positions() {
    let h = harness(config(10));
    let mut grants = Vec::new();
    for _ in 0..8 {
        grants.push(h.desk.request_slot(food_request(monday())).await.unwrap());
    }

    let handles: Vec<_> = grants
        .iter()
        .map(|grant| {
            let desk = h.desk.clone();
            let number = grant.ticket.number.clone();
            tokio::spawn(async move { desk.check_in(number, StaffId::new(), QueuePriority::Standard).await })
        })
        .collect();

    let mut positions = Vec::new();
    for outcome in join_all(handles).await {
        let entry = outcome.unwrap().unwrap();
        positions.push(h.desk.position(entry.id).await.unwrap());
    }
    positions.sort_unstable();
    assert_eq!(positions, (1..=8).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_racing_check_in_never_burns_the_ticket() {
    for _ in 0..100 {
        let h = harness(config(5));
        let grant = h.desk.request_slot(food_request(monday())).await.unwrap();
        let number = grant.ticket.number.clone();
        let reservation_id = grant.reservation.id;

        let cancel = {
            let desk = h.desk.clone();
            tokio::spawn(async move { desk.cancel_reservation(reservation_id).await })
        };
        let check_in = {
            let desk = h.desk.clone();
            let number = number.clone();
            tokio::spawn(async move { desk.check_in(number, StaffId::new(), QueuePriority::Standard).await })
        };
        let (cancel, check_in) = (cancel.await.unwrap(), check_in.await.unwrap());

        let ticket = h.desk.ticket(&number).await.unwrap();
        let reservation = h.desk.reservation(reservation_id).await.unwrap();
        let day = h.desk.availability(monday(), &Category::food()).await.unwrap();
        let waiting = h.desk.waiting_entries(&Category::food()).await.len();

        match (cancel, check_in) {
            (Err(AdmissionError::InvalidStateTransition { .. }), Ok(entry)) => {
                assert_eq!(ticket.status, TicketStatus::Used);
                assert_eq!(reservation.status, SlotStatus::Consumed);
                assert_eq!(day.current_count, 1);
                assert_eq!(h.desk.position(entry.id).await.unwrap(), 1);
            },
            (Ok(_), Err(AdmissionError::InvalidTicket(TicketRejection::Cancelled))) => {
                assert_eq!(ticket.status, TicketStatus::Cancelled);
                assert_eq!(reservation.status, SlotStatus::Released);
                assert_eq!(day.current_count, 0);
                assert_eq!(waiting, 0);
            },
            (cancel, check_in) => panic!("cancel={cancel:?} check_in={check_in:?}"),
        }
    }
}
