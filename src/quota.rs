//! Per-identity daily usage credits.
//!
//! Each identity gets a free allowance of requests per UTC day, tracked as
//! a usage counter keyed `{identity}:{YYYY-MM-DD}`. Verified payments buy
//! the counter back down via [`QuotaLedger::grant_allowance`], so a paying
//! caller regains free-tier headroom instead of paying for every request.

use crate::timestamp::IsoTimestamp;
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Extra time a day bucket survives past its midnight reset.
///
/// Keeps a bucket readable across clock skew between writers; expired
/// entries are never consulted for admission.
const EXPIRY_SLACK: Duration = Duration::from_secs(3600);

/// A usage counter store with compare-and-swap semantics.
///
/// The narrow interface keeps the ledger portable: the in-memory store
/// below is the default, and a Redis- or database-backed store only needs
/// these three operations.
pub trait CounterStore: Send + Sync {
    /// Current value for `key`, if present and unexpired.
    fn get(&self, key: &str) -> Option<u32>;

    /// Atomically replaces `key`'s value with `new` if it currently equals
    /// `expected` (`None` meaning absent). Returns whether the swap took.
    fn compare_and_swap(&self, key: &str, expected: Option<u32>, new: u32, ttl: Duration) -> bool;

    /// Refreshes `key`'s time to live.
    fn expire(&self, key: &str, ttl: Duration);
}

struct CounterEntry {
    value: u32,
    expires_at: Instant,
}

/// The default in-process [`CounterStore`].
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &str) -> Option<u32> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value)
    }

    fn compare_and_swap(&self, key: &str, expected: Option<u32>, new: u32, ttl: Duration) -> bool {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        // The entry API holds the shard lock, making read-compare-write atomic.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let live = current.expires_at > now;
                let matches = if live {
                    expected == Some(current.value)
                } else {
                    expected.is_none()
                };
                if !matches {
                    return false;
                }
                occupied.insert(CounterEntry {
                    value: new,
                    expires_at: now + ttl,
                });
                true
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return false;
                }
                vacant.insert(CounterEntry {
                    value: new,
                    expires_at: now + ttl,
                });
                true
            }
        }
    }

    fn expire(&self, key: &str, ttl: Duration) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
    }
}

/// The admission verdict for one request.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    /// Whether the request may proceed without payment.
    pub allowed: bool,
    /// Free requests left today.
    pub remaining: u32,
    /// When the day bucket resets.
    pub reset_at: IsoTimestamp,
}

/// Tracks free-tier usage per identity and UTC day.
pub struct QuotaLedger<S = MemoryCounterStore> {
    store: S,
    free_allowance: u32,
}

impl QuotaLedger<MemoryCounterStore> {
    /// An in-memory ledger granting `free_allowance` requests per day.
    pub fn new(free_allowance: u32) -> Self {
        QuotaLedger {
            store: MemoryCounterStore::new(),
            free_allowance,
        }
    }
}

impl<S: CounterStore> QuotaLedger<S> {
    /// A ledger over a custom counter store.
    pub fn with_store(store: S, free_allowance: u32) -> Self {
        QuotaLedger {
            store,
            free_allowance,
        }
    }

    /// The configured daily free allowance.
    pub fn free_allowance(&self) -> u32 {
        self.free_allowance
    }

    fn day_key(&self, identity: &str, now: IsoTimestamp) -> String {
        format!("{identity}:{}", now.utc_day())
    }

    fn ttl(&self, now: IsoTimestamp) -> Duration {
        now.until(now.next_utc_midnight()) + EXPIRY_SLACK
    }

    /// Whether `identity` still has free requests today.
    ///
    /// Read-only: call [`record_usage`](Self::record_usage) once the
    /// request is actually served.
    pub fn check_and_consume(&self, identity: &str) -> QuotaStatus {
        self.check_at(identity, IsoTimestamp::now())
    }

    fn check_at(&self, identity: &str, now: IsoTimestamp) -> QuotaStatus {
        let used = self.store.get(&self.day_key(identity, now)).unwrap_or(0);
        let remaining = self.free_allowance.saturating_sub(used);
        QuotaStatus {
            allowed: remaining > 0,
            remaining,
            reset_at: now.next_utc_midnight(),
        }
    }

    /// Records one served request against today's counter.
    pub fn record_usage(&self, identity: &str) {
        self.record_usage_at(identity, IsoTimestamp::now());
    }

    fn record_usage_at(&self, identity: &str, now: IsoTimestamp) {
        let key = self.day_key(identity, now);
        let ttl = self.ttl(now);
        loop {
            let current = self.store.get(&key);
            let next = current.unwrap_or(0).saturating_add(1);
            if self.store.compare_and_swap(&key, current, next, ttl) {
                debug!(identity, used = next, "usage recorded");
                return;
            }
        }
    }

    /// Credits `count` requests back to `identity` after a verified
    /// payment.
    ///
    /// If the free allowance was already exhausted, the counter restarts
    /// at `free_allowance - count`: overage beyond the allowance is
    /// discarded rather than carried as debt, so a payment always buys
    /// exactly `count` requests of headroom.
    pub fn grant_allowance(&self, identity: &str, count: u32) {
        self.grant_allowance_at(identity, count, IsoTimestamp::now());
    }

    fn grant_allowance_at(&self, identity: &str, count: u32, now: IsoTimestamp) {
        let key = self.day_key(identity, now);
        let ttl = self.ttl(now);
        loop {
            let current = self.store.get(&key);
            let used = current.unwrap_or(0);
            let next = if used >= self.free_allowance {
                self.free_allowance.saturating_sub(count)
            } else {
                used.saturating_sub(count)
            };
            if self.store.compare_and_swap(&key, current, next, ttl) {
                debug!(identity, used = next, granted = count, "allowance granted");
                return;
            }
        }
    }
}
