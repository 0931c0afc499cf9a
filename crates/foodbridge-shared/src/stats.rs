//! Daily dashboard figures.  Days are UTC calendar days.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::surplus::SurplusRecord;
use crate::types::{SurplusStatus, UserId};

/// `[start, end)` of the UTC day containing `now`.
pub fn day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);
    (start, start + Duration::days(1))
}

fn within(at: Option<DateTime<Utc>>, (start, end): (DateTime<Utc>, DateTime<Utc>)) -> bool {
    at.is_some_and(|t| t >= start && t < end)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NgoDailyStats {
    pub available_surplus: usize,
    pub claimed_today: usize,
    /// Sum of quantities claimed today and already collected.
    pub people_fed: f64,
}

/// `available` is the current feed; `claimed` the NGO's claimed listings.
pub fn ngo_daily(
    available: &[SurplusRecord],
    claimed: &[SurplusRecord],
    now: DateTime<Utc>,
) -> NgoDailyStats {
    let today = day_bounds(now);
    let claimed_today: Vec<&SurplusRecord> = claimed
        .iter()
        .filter(|r| within(r.claim.as_ref().map(|c| c.claimed_at), today))
        .collect();
    let people_fed = claimed_today
        .iter()
        .filter(|r| r.status == SurplusStatus::Collected)
        .map(|r| r.quantity)
        .sum();

    NgoDailyStats {
        available_surplus: available.len(),
        claimed_today: claimed_today.len(),
        people_fed,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDailyStats {
    pub available_deliveries: usize,
    pub completed_today: usize,
}

pub fn driver_daily(
    needing_drivers: &[SurplusRecord],
    assigned: &[SurplusRecord],
    driver: &UserId,
    now: DateTime<Utc>,
) -> DriverDailyStats {
    let today = day_bounds(now);
    let completed_today = assigned
        .iter()
        .filter(|r| r.assigned_driver_id.as_ref() == Some(driver))
        .filter(|r| within(r.recipient_delivery_verified_at, today))
        .count();

    DriverDailyStats {
        available_deliveries: needing_drivers.len(),
        completed_today,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanteenSummary {
    pub listed_today: usize,
    pub available: usize,
    pub claimed: usize,
    pub collected: usize,
    pub expired: usize,
}

/// Per-status counts of a canteen's listings.  Overdue listings are counted
/// as expired even before the transition is persisted.
pub fn canteen_summary(own: &[SurplusRecord], now: DateTime<Utc>) -> CanteenSummary {
    let today = day_bounds(now);
    let mut summary = CanteenSummary::default();
    for record in own {
        if within(Some(record.created_at), today) {
            summary.listed_today += 1;
        }
        match record.effective_status(now) {
            SurplusStatus::Available => summary.available += 1,
            SurplusStatus::Claimed => summary.claimed += 1,
            SurplusStatus::Collected => summary.collected += 1,
            SurplusStatus::Expired => summary.expired += 1,
        }
    }
    summary
}
