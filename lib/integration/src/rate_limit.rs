//! Sliding-window rate limiting for outbound integration calls.
//!
//! Each throttled integration gets its own limiter holding the timestamps
//! of every admitted request in the trailing 24 hours. Admission checks
//! count that history against three horizons at once (second, hour, day),
//! so a burst that is fine per-day can still be rejected per-second.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Declared request limits for an external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Maximum requests in any trailing second.
    pub requests_per_second: u32,
    /// Maximum requests in any trailing hour.
    pub requests_per_hour: u32,
    /// Maximum requests in any trailing 24 hours.
    pub requests_per_day: u32,
}

impl RateLimits {
    /// Creates a limit declaration.
    #[must_use]
    pub fn new(requests_per_second: u32, requests_per_hour: u32, requests_per_day: u32) -> Self {
        Self {
            requests_per_second,
            requests_per_hour,
            requests_per_day,
        }
    }
}

/// Admitted request counts per trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowUsage {
    /// Requests admitted in the trailing second.
    pub last_second: u32,
    /// Requests admitted in the trailing hour.
    pub last_hour: u32,
    /// Requests admitted in the trailing 24 hours.
    pub last_day: u32,
}

/// Admission control for a single integration.
///
/// Windows are half-open: a request made exactly one window ago no longer
/// counts against that window. Checking and recording happen as one step
/// under the limiter's lock, so concurrent callers can never both be
/// admitted past a limit.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limits: RateLimits,
    /// Admission timestamps within the trailing 24 hours, oldest first.
    history: Mutex<VecDeque<DateTime<Utc>>>,
}

impl SlidingWindowLimiter {
    /// Creates a limiter for the given limits.
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Attempts to admit a request at `now`.
    ///
    /// Returns `true` and records the request when every window has room;
    /// returns `false` and records nothing otherwise. Callers are expected
    /// to pass non-decreasing `now` values.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        let mut history = self.history.lock().unwrap();
        Self::prune(&mut history, now);

        let usage = Self::count(&history, now);
        if usage.last_second >= self.limits.requests_per_second
            || usage.last_hour >= self.limits.requests_per_hour
            || usage.last_day >= self.limits.requests_per_day
        {
            return false;
        }

        history.push_back(now);
        true
    }

    /// Returns the admitted request counts per window as of `now`.
    #[must_use]
    pub fn usage(&self, now: DateTime<Utc>) -> WindowUsage {
        let mut history = self.history.lock().unwrap();
        Self::prune(&mut history, now);
        Self::count(&history, now)
    }

    /// Returns the declared limits.
    #[must_use]
    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Drops timestamps that fell out of the day window.
    fn prune(history: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        let day_cutoff = now - Duration::days(1);
        while history.front().is_some_and(|t| *t <= day_cutoff) {
            history.pop_front();
        }
    }

    /// Counts the pruned history against all three windows.
    fn count(history: &VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> WindowUsage {
        let second_cutoff = now - Duration::seconds(1);
        let hour_cutoff = now - Duration::hours(1);

        let mut last_second = 0u32;
        let mut last_hour = 0u32;
        for timestamp in history.iter().rev() {
            if *timestamp <= hour_cutoff {
                break;
            }
            last_hour += 1;
            if *timestamp > second_cutoff {
                last_second += 1;
            }
        }

        WindowUsage {
            last_second,
            last_hour,
            last_day: history.len() as u32,
        }
    }
}
