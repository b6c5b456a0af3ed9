//! Shared setup for the admission integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use admission::{AdmissionDesk, Category, Config, RequesterId, SlotRequest, TimeWindow};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use visitgate_testing::{FixedClock, InMemoryEventBus, InMemoryEventStore};

/// A desk with its test doubles.
pub struct Harness {
    pub desk: AdmissionDesk,
    pub clock: FixedClock,
    pub events: Arc<InMemoryEventStore>,
    pub bus: Arc<InMemoryEventBus>,
}

/// Monday 2025-01-06, an operating day.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
}

/// `monday() + days`.
pub fn monday_plus(days: u64) -> NaiveDate {
    monday().checked_add_days(chrono::Days::new(days)).unwrap()
}

/// Defaults with `food` capacity set and fast persistence retries.
pub fn config(food_capacity: u32) -> Config {
    let mut config = Config::default();
    if let Some(food) = config.categories.get_mut(&Category::food()) {
        food.daily_capacity = food_capacity;
    }
    config.persistence.initial_backoff_ms = 1;
    config
}

/// 08:00 UTC on `date`.
pub fn eight_am(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(8, 0, 0).unwrap())
}

/// Clock at 08:00 UTC on `date`.
pub fn clock_on(date: NaiveDate) -> FixedClock {
    FixedClock::new(eight_am(date))
}

/// Desk with the clock on Monday morning.
pub fn harness(config: Config) -> Harness {
    let clock = clock_on(monday());
    let events = Arc::new(InMemoryEventStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let desk = AdmissionDesk::new(config, Arc::new(clock.clone()), events.clone(), bus.clone()).unwrap();
    Harness {
        desk,
        clock,
        events,
        bus,
    }
}

pub fn morning() -> TimeWindow {
    TimeWindow::new(
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
    )
    .unwrap()
}

pub fn request(requester_id: RequesterId, category: Category, date: NaiveDate) -> SlotRequest {
    SlotRequest {
        requester_id,
        category,
        date,
        time_window: morning(),
    }
}

pub fn food_request(date: NaiveDate) -> SlotRequest {
    request(RequesterId::new(), Category::food(), date)
}
