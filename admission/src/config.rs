//! Configuration for the admission desk.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Category rules (capacity, cooldown, ticket prefix, service time) are data,
//! not code: adding a category only needs a [`CategoryConfig`].

use crate::eligibility::EligibilityRule;
use crate::types::Category;
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use visitgate_runtime::RetryPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Rules per category
    pub categories: BTreeMap<Category, CategoryConfig>,
    /// Operating calendar
    pub calendar: CalendarConfig,
    /// Ticket numbering and payload signing
    pub tickets: TicketConfig,
    /// Queue estimates
    pub queue: QueueConfig,
    /// Event log retries
    pub persistence: PersistenceConfig,
    /// Log filter (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Rules for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Default `max_capacity` for a day
    pub daily_capacity: u32,
    /// Days between consumed reservations
    pub cooldown_days: u32,
    /// Requesters with no consumed reservation skip the cooldown
    pub first_time_bypass: bool,
    /// Bypasses capacity gating; still counted for reporting
    pub capacity_exempt: bool,
    /// Ticket number prefix
    pub ticket_prefix: String,
    /// Service time used until enough samples exist
    pub average_service_minutes: u32,
}

impl CategoryConfig {
    /// Cooldown rule for the eligibility evaluator.
    #[must_use]
    pub const fn eligibility_rule(&self) -> EligibilityRule {
        EligibilityRule {
            cooldown_days: self.cooldown_days,
            first_time_bypass: self.first_time_bypass,
        }
    }

    /// Configured service time per visitor.
    #[must_use]
    pub fn average_service_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.average_service_minutes) * 60)
    }
}

/// Operating calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Weekdays on which new days start closed
    pub closed_weekdays: Vec<Weekday>,
}

/// Ticket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketConfig {
    /// HMAC key for redemption payloads
    pub secret: String,
    /// Attempts to find an unused number before giving up
    pub max_number_attempts: u32,
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Service times kept per category for the rolling average
    pub service_sample_window: usize,
}

/// Event log retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Retries after the first failed append or publish
    pub max_retries: usize,
    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,
}

impl PersistenceConfig {
    /// Retry policy for the aggregate stores.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .build()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut categories = BTreeMap::new();
        for (name, capacity, cooldown, exempt, prefix, minutes) in [
            ("food", 50, 7, false, "FD", 10),
            ("general", 30, 30, false, "GN", 20),
            ("emergency", 10, 0, true, "EM", 15),
        ] {
            let var = name.to_uppercase();
            categories.insert(
                Category::new(name),
                CategoryConfig {
                    daily_capacity: parse_var(&lookup, &format!("ADMISSION_{var}_CAPACITY")).unwrap_or(capacity),
                    cooldown_days: parse_var(&lookup, &format!("ADMISSION_{var}_COOLDOWN_DAYS")).unwrap_or(cooldown),
                    first_time_bypass: parse_var(&lookup, &format!("ADMISSION_{var}_FIRST_TIME_BYPASS"))
                        .unwrap_or(true),
                    capacity_exempt: exempt,
                    ticket_prefix: prefix.to_string(),
                    average_service_minutes: parse_var(&lookup, &format!("ADMISSION_{var}_SERVICE_MINUTES"))
                        .unwrap_or(minutes),
                },
            );
        }

        Self {
            categories,
            calendar: CalendarConfig {
                closed_weekdays: lookup("ADMISSION_CLOSED_WEEKDAYS")
                    .map_or_else(|| vec![Weekday::Sun], |s| parse_weekdays(&s)),
            },
            tickets: TicketConfig {
                secret: lookup("ADMISSION_TICKET_SECRET")
                    .unwrap_or_else(|| "visitgate-development-secret".to_string()),
                max_number_attempts: parse_var(&lookup, "ADMISSION_TICKET_MAX_NUMBER_ATTEMPTS").unwrap_or(5),
            },
            queue: QueueConfig {
                service_sample_window: parse_var(&lookup, "ADMISSION_SERVICE_SAMPLE_WINDOW").unwrap_or(20),
            },
            persistence: PersistenceConfig {
                max_retries: parse_var(&lookup, "ADMISSION_PERSIST_MAX_RETRIES").unwrap_or(3),
                initial_backoff_ms: parse_var(&lookup, "ADMISSION_PERSIST_BACKOFF_MS").unwrap_or(100),
            },
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "info,admission=debug".to_string()),
        }
    }

    /// Rules for `category`, if configured.
    #[must_use]
    pub fn category(&self, category: &Category) -> Option<&CategoryConfig> {
        self.categories.get(category)
    }

    /// Whether days falling on `weekday` start closed.
    #[must_use]
    pub fn is_closed_weekday(&self, weekday: Weekday) -> bool {
        self.calendar.closed_weekdays.contains(&weekday)
    }

    /// Replace the rules for one category.
    #[must_use]
    pub fn with_category(mut self, category: Category, config: CategoryConfig) -> Self {
        self.categories.insert(category, config);
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}

/// Parse `"sat,sun"`; unknown names are skipped, an empty string means
/// every day is open.
fn parse_weekdays(raw: &str) -> Vec<Weekday> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<Weekday>() {
            Ok(day) => Some(day),
            Err(_) => {
                tracing::warn!(weekday = s, "Ignoring unknown weekday in ADMISSION_CLOSED_WEEKDAYS");
                None
            },
        })
        .collect()
}
