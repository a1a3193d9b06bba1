//! Striped atomic counters and a life-expectancy histogram (spec §2, §6).
//
// Counters are sharded 256-wide, matching the teacher's own
// `once_cell::Lazy<Vec<AtomicU64>>` striping idiom for hot counters
// (`src/metrics/code.rs`), to keep concurrent increments from
// cache-lining on each other. When metrics collection is disabled the
// counters stay allocated but every increment is a single relaxed
// branch — the same runtime-togglable pattern as the teacher's
// `atomic_enabled: Arc<AtomicBool>` (`src/config/mod.rs`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

const STRIPES: usize = 256;

/// Life expectancy is bucketed by power-of-two seconds, the
/// conventional ristretto-lineage bucket ladder, up to ~18h.
const HISTOGRAM_BUCKETS: usize = 16;

#[repr(align(64))]
struct PaddedCounter(AtomicU64);

struct StripedCounter {
    stripes: Vec<PaddedCounter>,
}

impl StripedCounter {
    fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| PaddedCounter(AtomicU64::new(0))).collect(),
        }
    }

    #[inline]
    fn add(&self, stripe_hint: u64, n: u64) {
        let idx = (stripe_hint as usize) & (STRIPES - 1);
        self.stripes[idx].0.fetch_add(n, Ordering::Relaxed);
    }

    fn sum(&self) -> u64 {
        self.stripes.iter().map(|c| c.0.load(Ordering::Relaxed)).sum()
    }

    fn clear(&self) {
        for c in &self.stripes {
            c.0.store(0, Ordering::Relaxed);
        }
    }
}

/// Metric kinds the cache reports, per spec §6's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricKind {
    Hit,
    Miss,
    KeysAdded,
    KeysUpdated,
    KeysEvicted,
    CostAdded,
    CostEvicted,
    SetsDropped,
    SetsRejected,
    GetsDropped,
    GetsKept,
}

const ALL_KINDS: [MetricKind; 11] = [
    MetricKind::Hit,
    MetricKind::Miss,
    MetricKind::KeysAdded,
    MetricKind::KeysUpdated,
    MetricKind::KeysEvicted,
    MetricKind::CostAdded,
    MetricKind::CostEvicted,
    MetricKind::SetsDropped,
    MetricKind::SetsRejected,
    MetricKind::GetsDropped,
    MetricKind::GetsKept,
];

/// A snapshot of all counters plus the life-expectancy histogram,
/// suitable for embedding in an application's own reporting surface.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub keys_added: u64,
    pub keys_updated: u64,
    pub keys_evicted: u64,
    pub cost_added: u64,
    pub cost_evicted: u64,
    pub sets_dropped: u64,
    pub sets_rejected: u64,
    pub gets_dropped: u64,
    pub gets_kept: u64,
    /// Hit ratio: `hits / (hits + misses)`. `None` with no observations.
    pub ratio: Option<f64>,
    /// Life expectancy histogram: bucket `i` counts evictions whose
    /// lifetime fell in `[2^i, 2^(i+1))` seconds.
    pub life_expectancy_seconds: Vec<u64>,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("MetricsSnapshot is always representable as JSON")
    }
}

/// Process-lifetime metrics collector. Cheap no-op increments when
/// disabled; never allocates on the hot path.
pub struct Metrics {
    enabled: AtomicBool,
    counters: Vec<StripedCounter>,
    histogram: Mutex<[u64; HISTOGRAM_BUCKETS]>,
}

impl Metrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            counters: ALL_KINDS.iter().map(|_| StripedCounter::new()).collect(),
            histogram: Mutex::new([0u64; HISTOGRAM_BUCKETS]),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    pub fn record(&self, kind: MetricKind, stripe_hint: u64, n: u64) {
        if !self.is_enabled() {
            return;
        }
        self.counters[kind as usize].add(stripe_hint, n);
    }

    /// Records how long an evicted entry lived, in seconds.
    pub fn record_life_expectancy(&self, lived_seconds: u64) {
        if !self.is_enabled() {
            return;
        }
        let bucket = (64 - (lived_seconds + 1).leading_zeros()) as usize;
        let bucket = bucket.min(HISTOGRAM_BUCKETS - 1);
        self.histogram.lock()[bucket] += 1;
    }

    fn get(&self, kind: MetricKind) -> u64 {
        self.counters[kind as usize].sum()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.get(MetricKind::Hit);
        let misses = self.get(MetricKind::Miss);
        let ratio = if hits + misses > 0 {
            Some(hits as f64 / (hits + misses) as f64)
        } else {
            None
        };

        MetricsSnapshot {
            hits,
            misses,
            keys_added: self.get(MetricKind::KeysAdded),
            keys_updated: self.get(MetricKind::KeysUpdated),
            keys_evicted: self.get(MetricKind::KeysEvicted),
            cost_added: self.get(MetricKind::CostAdded),
            cost_evicted: self.get(MetricKind::CostEvicted),
            sets_dropped: self.get(MetricKind::SetsDropped),
            sets_rejected: self.get(MetricKind::SetsRejected),
            gets_dropped: self.get(MetricKind::GetsDropped),
            gets_kept: self.get(MetricKind::GetsKept),
            ratio,
            life_expectancy_seconds: self.histogram.lock().to_vec(),
        }
    }

    pub fn clear(&self) {
        for c in &self.counters {
            c.clear();
        }
        *self.histogram.lock() = [0u64; HISTOGRAM_BUCKETS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_stay_at_zero() {
        let m = Metrics::new(false);
        m.record(MetricKind::Hit, 0, 1);
        assert_eq!(m.snapshot().hits, 0);
    }

    #[test]
    fn enabled_metrics_accumulate_across_stripes() {
        let m = Metrics::new(true);
        for i in 0..1000u64 {
            m.record(MetricKind::Hit, i, 1);
        }
        assert_eq!(m.snapshot().hits, 1000);
    }

    #[test]
    fn ratio_is_none_without_observations() {
        let m = Metrics::new(true);
        assert_eq!(m.snapshot().ratio, None);
    }

    #[test]
    fn ratio_reflects_hits_over_total() {
        let m = Metrics::new(true);
        m.record(MetricKind::Hit, 0, 3);
        m.record(MetricKind::Miss, 0, 1);
        assert_eq!(m.snapshot().ratio, Some(0.75));
    }

    #[test]
    fn clear_resets_counters_and_histogram() {
        let m = Metrics::new(true);
        m.record(MetricKind::Hit, 0, 5);
        m.record_life_expectancy(120);
        m.clear();
        let snap = m.snapshot();
        assert_eq!(snap.hits, 0);
        assert!(snap.life_expectancy_seconds.iter().all(|&b| b == 0));
    }
}
