//! Business clock.
//!
//! Every time-dependent decision (accrual anniversaries, maturity, penalty
//! windows) reads the time from a [`Clock`] handed in at construction, never
//! from `Utc::now()` directly. [`ControllableClock`] lets an administrator pin
//! the business time to an instant, move it forward, or hand control back to
//! the system clock.

use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use std::sync::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Snapshot reported by the admin clock endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ClockState {
    pub now: DateTime<Utc>,
    pub system_now: DateTime<Utc>,
    pub overridden: bool,
}

/// Clock that follows the system time until overridden.
///
/// While overridden the clock is frozen at the set instant; `advance` moves
/// the frozen instant.
#[derive(Debug, Default)]
pub struct ControllableClock {
    pinned: RwLock<Option<DateTime<Utc>>>,
}

impl ControllableClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock frozen at `at`.
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self {
            pinned: RwLock::new(Some(at)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.pinned.write().unwrap_or_else(|e| e.into_inner()) = Some(at);
        tracing::info!(at = %at, "Business clock pinned");
    }

    /// Moves the business time forward (or back, for negative durations).
    /// Pins the clock at `system now + by` if it was following the system.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut pinned = self.pinned.write().unwrap_or_else(|e| e.into_inner());
        let base = pinned.unwrap_or_else(Utc::now);
        let next = base + by;
        *pinned = Some(next);
        tracing::info!(by_seconds = by.num_seconds(), now = %next, "Business clock advanced");
        next
    }

    pub fn reset(&self) {
        *self.pinned.write().unwrap_or_else(|e| e.into_inner()) = None;
        tracing::info!("Business clock reset to system time");
    }

    pub fn is_overridden(&self) -> bool {
        self.pinned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn state(&self) -> ClockState {
        let system_now = Utc::now();
        let pinned = *self.pinned.read().unwrap_or_else(|e| e.into_inner());
        ClockState {
            now: pinned.unwrap_or(system_now),
            system_now,
            overridden: pinned.is_some(),
        }
    }
}

impl Clock for ControllableClock {
    fn now(&self) -> DateTime<Utc> {
        self.pinned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_else(Utc::now)
    }
}

/// `start` plus `months` calendar months. Day-of-month is clamped to the
/// last day of the target month (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(start: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    start.checked_add_months(Months::new(months))
}

/// The `years`-th anniversary of `origin`.
///
/// Always computed from the origin rather than by stepping from the previous
/// anniversary, so a Feb 29 origin falls on Feb 28 in common years and comes
/// back to Feb 29 in leap years.
pub fn anniversary(origin: DateTime<Utc>, years: u32) -> Option<DateTime<Utc>> {
    years
        .checked_mul(12)
        .and_then(|months| add_months(origin, months))
}

/// First anniversary of `origin` strictly after `instant`.
pub fn next_anniversary_after(
    origin: DateTime<Utc>,
    instant: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut years = 1u32;
    // Jump close to the target before walking.
    if instant > origin {
        let approx = (instant - origin).num_days() / 366;
        years = u32::try_from(approx).unwrap_or(u32::MAX / 12).max(1);
    }
    loop {
        let candidate = anniversary(origin, years)?;
        if candidate > instant {
            return Some(candidate);
        }
        years = years.checked_add(1)?;
    }
}
