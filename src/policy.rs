//! W-TinyLFU admission / sampled-LFU eviction policy (spec §4.5).
//
// Wraps the [`Admittor`] and [`Ledger`] behind a single mutex — the
// sketch inside the admittor is not thread-safe, so every mutating
// entry point here (and the batched access drain task) must go
// through that same lock (spec §4.5, §5). Readers never take it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::admittor::Admittor;
use super::ledger::Ledger;
use super::metrics::{MetricKind, Metrics};

/// Depth of the batched-access channel (spec §4.5/§5: capacity 3).
const GETS_CHANNEL_CAPACITY: usize = 3;

pub(crate) struct PolicyInner {
    admittor: Admittor,
    ledger: Ledger,
}

pub struct Policy {
    inner: Arc<Mutex<PolicyInner>>,
    gets_tx: mpsc::Sender<Vec<u64>>,
    closed: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
    sample_size: usize,
}

impl Policy {
    pub fn new(
        num_counters: usize,
        max_cost: i64,
        doorkeeper_fpr: f64,
        sample_size: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(PolicyInner {
            admittor: Admittor::new(num_counters, doorkeeper_fpr),
            ledger: Ledger::new(max_cost),
        }));

        let (gets_tx, mut gets_rx) = mpsc::channel::<Vec<u64>>(GETS_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        let drain_inner = inner.clone();
        let drain_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(batch) = gets_rx.recv().await {
                if drain_closed.load(Ordering::Relaxed) {
                    break;
                }
                drain_inner.lock().admittor.push(&batch);
            }
            debug!("policy drain task stopped");
        });

        Self {
            inner,
            gets_tx,
            closed,
            metrics,
            sample_size: sample_size.max(1),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Non-blockingly posts a batch of access hashes for the drain
    /// task to fold into the admittor. Drops the batch under pressure.
    pub fn push(&self, batch: Vec<u64>) {
        if self.is_closed() || batch.is_empty() {
            return;
        }
        match self.gets_tx.try_send(batch) {
            Ok(()) => self.metrics.record(MetricKind::GetsKept, 0, 1),
            Err(_) => {
                warn!("gets channel full, dropping access batch");
                self.metrics.record(MetricKind::GetsDropped, 0, 1);
            }
        }
    }

    /// `Add(key, cost) -> (victims, admitted)` per spec §4.5's state
    /// machine. Victim primaries are returned in eviction order.
    pub fn add(&self, primary: u64, cost: i64) -> (Vec<u64>, bool) {
        if self.is_closed() {
            return (Vec::new(), false);
        }

        let mut inner = self.inner.lock();

        if cost > inner.ledger.max_cost() {
            return (Vec::new(), false);
        }

        if inner.ledger.update_if_has(primary, cost) {
            self.metrics.record(MetricKind::KeysUpdated, primary, 1);
            return (Vec::new(), false);
        }

        if inner.ledger.room_left(cost) >= 0 {
            inner.ledger.add(primary, cost);
            self.metrics.record(MetricKind::CostAdded, primary, cost.max(0) as u64);
            self.metrics.record(MetricKind::KeysAdded, primary, 1);
            return (Vec::new(), true);
        }

        let inc_hits = inner.admittor.estimate(primary);
        let mut sample: Vec<(u64, i64)> = Vec::with_capacity(self.sample_size);
        inner.ledger.fill_sample(&mut sample, self.sample_size);

        let mut victims = Vec::new();

        loop {
            if sample.is_empty() {
                self.metrics.record(MetricKind::SetsRejected, primary, 1);
                return (victims, false);
            }

            let mut min_idx = 0;
            let mut min_hits = inner.admittor.estimate(sample[0].0);
            for (i, &(candidate, _)) in sample.iter().enumerate().skip(1) {
                let h = inner.admittor.estimate(candidate);
                if h < min_hits {
                    min_hits = h;
                    min_idx = i;
                }
            }

            if inc_hits < min_hits {
                self.metrics.record(MetricKind::SetsRejected, primary, 1);
                return (victims, false);
            }

            let (victim_primary, victim_cost) = sample.swap_remove(min_idx);
            inner.ledger.delete(victim_primary);
            victims.push(victim_primary);
            self.metrics
                .record(MetricKind::CostEvicted, victim_primary, victim_cost.max(0) as u64);
            self.metrics.record(MetricKind::KeysEvicted, victim_primary, 1);

            if inner.ledger.room_left(cost) >= 0 {
                break;
            }
            inner.ledger.fill_sample(&mut sample, self.sample_size);
        }

        inner.ledger.add(primary, cost);
        self.metrics.record(MetricKind::CostAdded, primary, cost.max(0) as u64);
        self.metrics.record(MetricKind::KeysAdded, primary, 1);
        (victims, true)
    }

    pub fn has(&self, primary: u64) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.lock().ledger.has(primary)
    }

    pub fn delete(&self, primary: u64) {
        if self.is_closed() {
            return;
        }
        self.inner.lock().ledger.delete(primary);
    }

    pub fn cost(&self, primary: u64) -> Option<i64> {
        if self.is_closed() {
            return None;
        }
        self.inner.lock().ledger.cost(primary)
    }

    /// Update-only path for `Item::Update`: adjusts the ledger's cost
    /// bookkeeping for an already-tracked key. Returns false if the
    /// key wasn't tracked.
    pub fn update(&self, primary: u64, cost: i64) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut inner = self.inner.lock();
        let ok = inner.ledger.update_if_has(primary, cost);
        if ok {
            self.metrics.record(MetricKind::KeysUpdated, primary, 1);
        }
        ok
    }

    pub fn capacity_remaining(&self) -> i64 {
        if self.is_closed() {
            return 0;
        }
        let inner = self.inner.lock();
        inner.ledger.max_cost() - inner.ledger.used()
    }

    pub fn max_cost(&self) -> i64 {
        self.inner.lock().ledger.max_cost()
    }

    pub fn update_max_cost(&self, new_max_cost: i64) {
        if self.is_closed() {
            return;
        }
        self.inner.lock().ledger.update_max_cost(new_max_cost);
    }

    /// Resets both halves of the policy: the cost ledger and the
    /// admittor's frequency state (sketch + doorkeeper). Without the
    /// latter, a key that was hot before `clear()` would keep its
    /// admission advantage afterward.
    pub fn clear(&self) {
        if self.is_closed() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.ledger.clear();
        inner.admittor.clear();
    }

    /// Idempotent: marks the policy closed so subsequent mutating
    /// calls are no-ops (spec §7).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}
