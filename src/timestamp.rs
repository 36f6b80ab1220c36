//! ISO-8601 timestamp utilities for payment expiry windows.
//!
//! Payment requests carry an absolute `expires_at` and authorizations carry a
//! `timestamp`, both serialized as ISO-8601 / RFC 3339 strings in UTC. The
//! quota ledger also buckets usage by UTC calendar day, which this module's
//! [`IsoTimestamp`] knows how to compute.

use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// A UTC timestamp serialized as an ISO-8601 string.
///
/// # Serialization
///
/// ```json
/// "2026-08-23T17:02:11.000Z"
/// ```
///
/// Offsets other than `Z` (e.g. `+00:00`) are accepted on input and
/// normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IsoTimestamp(pub DateTime<Utc>);

impl IsoTimestamp {
    /// Returns the current system time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns this timestamp shifted forward by `duration`.
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero()))
    }

    /// Returns this timestamp shifted backward by `duration`.
    pub fn minus(&self, duration: Duration) -> Self {
        Self(self.0 - chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero()))
    }

    /// `true` if this timestamp is strictly before `now`.
    pub fn is_past_at(&self, now: IsoTimestamp) -> bool {
        now.0 > self.0
    }

    /// The UTC calendar day this timestamp falls on, as `YYYY-MM-DD`.
    ///
    /// Used as the day bucket in quota ledger keys.
    pub fn utc_day(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    /// The next UTC midnight strictly after this timestamp.
    ///
    /// This is when a day's free allowance logically resets.
    pub fn next_utc_midnight(&self) -> IsoTimestamp {
        let next_day = self
            .0
            .date_naive()
            .checked_add_days(Days::new(1))
            .unwrap_or(self.0.date_naive())
            .and_time(NaiveTime::MIN);
        IsoTimestamp(next_day.and_utc())
    }

    /// Time remaining until `later`, saturating to zero if `later` has passed.
    pub fn until(&self, later: IsoTimestamp) -> Duration {
        (later.0 - self.0).to_std().unwrap_or(Duration::ZERO)
    }
}

impl From<DateTime<Utc>> for IsoTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl Display for IsoTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
