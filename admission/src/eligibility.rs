//! Eligibility evaluator: the per-category cooldown between visits.
//!
//! Pure functions over a requester's reservation history. Identity and
//! document checks happen upstream; this only enforces visit frequency.
//!
//! The cooldown is measured from the day being requested, in both
//! directions. A slot already held for next Tuesday blocks a request for
//! this Friday just as a visit last Friday would, so booking ahead cannot
//! stack visits inside one cooldown window.

use crate::types::{Category, SlotReservation, SlotStatus};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Cooldown rule for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityRule {
    /// Minimum days between two visits in the category
    pub cooldown_days: u32,
    /// When `false`, released reservations (cancelled or expired) also
    /// count as visits
    pub first_time_bypass: bool,
}

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// The request may proceed
    Eligible,
    /// Cooldown still running
    Ineligible {
        /// First day the requester becomes eligible again
        next_available: NaiveDate,
    },
}

impl Eligibility {
    /// `true` for [`Eligibility::Eligible`].
    #[must_use]
    pub const fn is_eligible(self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Evaluate the cooldown for a visit to `category` on `date`.
///
/// Consumed visits and slots still held in the same category count. The
/// request is eligible when every one of them is at least `cooldown_days`
/// away from `date`. Otherwise `next_available` is the first later day
/// that clears all of them.
pub fn evaluate<'a, I>(rule: &EligibilityRule, category: &Category, history: I, date: NaiveDate) -> Eligibility
where
    I: IntoIterator<Item = &'a SlotReservation>,
{
    let visits: Vec<NaiveDate> = history
        .into_iter()
        .filter(|r| &r.category == category)
        .filter(|r| match r.status {
            SlotStatus::Consumed | SlotStatus::Reserved | SlotStatus::Pending => true,
            SlotStatus::Released => !rule.first_time_bypass,
        })
        .map(|r| r.date)
        .collect();

    let mut candidate = date;
    loop {
        let blocking_end = visits
            .iter()
            .filter(|visit| within_cooldown(**visit, candidate, rule.cooldown_days))
            .map(|visit| cooldown_end(*visit, rule.cooldown_days))
            .max();
        match blocking_end {
            Some(end) if end > candidate => candidate = end,
            Some(_) => break,
            None if candidate == date => return Eligibility::Eligible,
            None => break,
        }
    }

    Eligibility::Ineligible {
        next_available: candidate,
    }
}

/// `true` if `visit` and `day` are fewer than `cooldown_days` apart.
fn within_cooldown(visit: NaiveDate, day: NaiveDate, cooldown_days: u32) -> bool {
    (day - visit).num_days().abs() < i64::from(cooldown_days)
}

fn cooldown_end(visit: NaiveDate, cooldown_days: u32) -> NaiveDate {
    visit
        .checked_add_days(Days::new(u64::from(cooldown_days)))
        .unwrap_or(NaiveDate::MAX)
}

/// Eligible iff `today >= last_visit + cooldown_days`.
#[must_use]
pub fn check_cooldown(last_visit: NaiveDate, cooldown_days: u32, today: NaiveDate) -> Eligibility {
    let cooldown_end = cooldown_end(last_visit, cooldown_days);

    if today >= cooldown_end {
        Eligibility::Eligible
    } else {
        Eligibility::Ineligible {
            next_available: cooldown_end,
        }
    }
}
