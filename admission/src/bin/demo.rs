//! Admission demo: one day at a small food desk.
//!
//! Runs against the in-memory event store and bus with a settable clock:
//! two requesters get the last slots of a Monday, a third is turned away,
//! one visitor checks in and is served, the other shows up a day late.
//! Prints the Prometheus scrape at the end.
//!
//! ```bash
//! RUST_LOG=info,admission=debug cargo run --bin admission-demo
//! ```

#![allow(missing_docs)]

use admission::{
    AdmissionDesk, AdmissionError, Category, Config, QueuePriority, RequesterId, SlotRequest, StaffId, TimeWindow,
};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use visitgate_core::environment::Clock;
use visitgate_testing::{FixedClock, InMemoryEventBus, InMemoryEventStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    admission::metrics::register_admission_metrics();

    let food = Category::food();
    if let Some(rules) = config.categories.get_mut(&food) {
        rules.daily_capacity = 2;
    }

    let day = NaiveDate::from_ymd_opt(2025, 1, 6).ok_or_else(|| anyhow::anyhow!("invalid demo date"))?;
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).single().unwrap_or_default());
    let events = Arc::new(InMemoryEventStore::new());
    let desk = AdmissionDesk::new(
        config,
        Arc::new(clock.clone()),
        events.clone(),
        Arc::new(InMemoryEventBus::new()),
    )?;

    let morning = TimeWindow::new(
        NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
    )?;
    let request = |requester_id| SlotRequest {
        requester_id,
        category: food.clone(),
        date: day,
        time_window: morning,
    };

    tracing::info!("Starting admission demo for {day}");

    let x = desk.request_slot(request(RequesterId::new())).await?;
    let y = desk.request_slot(request(RequesterId::new())).await?;
    tracing::info!(x = %x.ticket.number, y = %y.ticket.number, "Two slots granted");
    println!("{}", serde_json::to_string_pretty(&x.ticket)?);

    match desk.request_slot(request(RequesterId::new())).await {
        Err(error @ AdmissionError::NoCapacity { .. }) => {
            let alternatives = desk.availability_range(&food, day, 4).await?;
            let open: Vec<String> = alternatives
                .iter()
                .filter(|d| d.remaining() > 0)
                .map(|d| format!("{} ({} left)", d.date, d.remaining()))
                .collect();
            tracing::info!(error = %error, alternatives = ?open, "Third requester turned away");
        },
        other => anyhow::bail!("expected the day to be full, got {other:?}"),
    }

    let staff = StaffId::new();
    let entry = desk
        .check_in_with_payload(&x.redemption_payload, staff, QueuePriority::Standard)
        .await?;
    tracing::info!(
        position = desk.position(entry.id).await?,
        wait = ?desk.estimated_wait(entry.id).await?,
        "X is in the queue"
    );

    clock.advance_days(1);
    if let Err(error) = desk.check_in(y.ticket.number.clone(), staff, QueuePriority::Standard).await {
        tracing::info!(error = %error, "Y arrived a day late");
    }

    let called = desk
        .call_next(food.clone())
        .await?
        .ok_or_else(|| anyhow::anyhow!("nobody to call"))?;
    clock.advance(chrono::Duration::minutes(3));
    desk.mark_served(called.id).await?;
    clock.advance(chrono::Duration::minutes(8));
    let done = desk.mark_completed(called.id).await?;
    tracing::info!(ticket_number = %done.ticket_number, status = done.status.as_str(), "X served");

    let expired = desk.expire_stale_reservations(clock.today()).await?;
    tracing::info!(expired = expired.len(), "Stale reservations swept");

    desk.shutdown(Duration::from_secs(5)).await?;
    for stream in ["capacity-ledger", "slot-allocator", "credential-issuer", "queue-manager"] {
        tracing::info!(stream, events = ?events.event_types(stream), "Event log");
    }

    println!("{}", prometheus.render());
    Ok(())
}
