// src/core/rate/mod.rs

//! Per-tenant sliding rate counters: events/sec, joins/sec, connected
//! clients and channels-per-client. Each counter is a two-bucket sliding
//! window (current second, previous second) rather than a true continuous
//! average, which is enough to bound bursts without per-tick bookkeeping.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::core::types::TenantId;

fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A two-bucket sliding window counter keyed by wall-clock second.
struct SlidingCounter {
    bucket_secs: AtomicI64,
    current: AtomicU64,
    previous: AtomicU64,
}

impl Default for SlidingCounter {
    fn default() -> Self {
        Self {
            bucket_secs: AtomicI64::new(now_unix_secs()),
            current: AtomicU64::new(0),
            previous: AtomicU64::new(0),
        }
    }
}

impl SlidingCounter {
    fn roll(&self, now: i64) {
        let bucket = self.bucket_secs.load(Ordering::Relaxed);
        if now == bucket {
            return;
        }
        if now == bucket + 1 {
            let cur = self.current.swap(0, Ordering::AcqRel);
            self.previous.store(cur, Ordering::Release);
        } else {
            // more than a second has passed with no activity; both buckets are stale.
            self.current.store(0, Ordering::Release);
            self.previous.store(0, Ordering::Release);
        }
        self.bucket_secs.store(now, Ordering::Release);
    }

    fn increment(&self, by: u64) -> u64 {
        let now = now_unix_secs();
        self.roll(now);
        self.current.fetch_add(by, Ordering::AcqRel) + by
    }

    /// The averaged rate over the last (up to) two seconds. Using the
    /// previous bucket smooths out the instant a new second starts with
    /// zero samples yet.
    fn rate(&self) -> u64 {
        let now = now_unix_secs();
        self.roll(now);
        let cur = self.current.load(Ordering::Acquire);
        let prev = self.previous.load(Ordering::Acquire);
        (cur + prev) / 2
    }
}

/// Which sliding counter a given credit/read applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    EventsPerSecond,
    JoinsPerSecond,
    ChannelsPerClient,
    RequestsPerSecond,
}

/// Per-tenant rate counters, shared by every session under that tenant's
/// connect supervisor.
#[derive(Default)]
pub struct RateCounters {
    counters: DashMap<(TenantId, CounterKind), SlidingCounter>,
}

impl RateCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, tenant: &TenantId, kind: CounterKind, amount: u64) -> u64 {
        self.counters
            .entry((tenant.clone(), kind))
            .or_default()
            .increment(amount)
    }

    pub fn rate(&self, tenant: &TenantId, kind: CounterKind) -> u64 {
        self.counters
            .get(&(tenant.clone(), kind))
            .map(|c| c.rate())
            .unwrap_or(0)
    }

    /// Checks a counter against a limit before crediting, crediting only on
    /// success. Returns `false` (and does not credit) if the limit would be
    /// exceeded.
    pub fn try_credit(&self, tenant: &TenantId, kind: CounterKind, limit: u64) -> bool {
        if limit == 0 {
            return true;
        }
        if self.rate(tenant, kind) >= limit {
            return false;
        }
        self.credit(tenant, kind, 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_accumulates_within_a_bucket() {
        let counters = RateCounters::new();
        let tenant = TenantId::from("acme");
        counters.credit(&tenant, CounterKind::EventsPerSecond, 1);
        counters.credit(&tenant, CounterKind::EventsPerSecond, 1);
        assert!(counters.rate(&tenant, CounterKind::EventsPerSecond) >= 1);
    }

    #[test]
    fn try_credit_blocks_once_limit_reached() {
        let counters = RateCounters::new();
        let tenant = TenantId::from("acme");
        assert!(counters.try_credit(&tenant, CounterKind::JoinsPerSecond, 1));
        assert!(!counters.try_credit(&tenant, CounterKind::JoinsPerSecond, 1));
    }

    #[test]
    fn unlimited_counter_always_allows() {
        let counters = RateCounters::new();
        let tenant = TenantId::from("acme");
        for _ in 0..5 {
            assert!(counters.try_credit(&tenant, CounterKind::RequestsPerSecond, 0));
        }
    }
}
