//! Sharded store: 256 shards of `{primary -> StoreRecord}` plus the
//! shared expiration index (spec §4.7).

pub mod record;
pub mod shard;

use std::sync::Arc;

use crate::expire::ExpirationIndex;
use crate::metrics::{MetricKind, Metrics};
pub use record::StoreRecord;
pub use shard::{Shard, ShouldUpdateFn};

pub const NUM_SHARDS: usize = 256;
const SHARD_MASK: u64 = (NUM_SHARDS - 1) as u64;

pub struct Store<V> {
    shards: Vec<Shard<V>>,
    metrics: Arc<Metrics>,
}

impl<V: Clone> Store<V> {
    /// Each shard keeps its own clone of `expiry` — the store itself
    /// never touches the expiration index directly, only hands it out
    /// at construction (spec §4.7).
    pub fn new(expiry: Arc<ExpirationIndex>, metrics: Arc<Metrics>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::new(expiry.clone())).collect();
        Self { shards, metrics }
    }

    #[inline]
    fn shard(&self, primary: u64) -> &Shard<V> {
        &self.shards[(primary & SHARD_MASK) as usize]
    }

    pub fn get(&self, primary: u64, conflict: u64) -> Option<V> {
        let value = self.shard(primary).get(primary, conflict);
        if value.is_some() {
            self.metrics.record(MetricKind::Hit, primary, 1);
        } else {
            self.metrics.record(MetricKind::Miss, primary, 1);
        }
        value
    }

    pub fn expiration(&self, primary: u64, conflict: u64) -> Option<u64> {
        self.shard(primary).expiration(primary, conflict)
    }

    pub fn cost(&self, primary: u64) -> Option<i64> {
        self.shard(primary).cost(primary)
    }

    pub fn set(&self, record: StoreRecord<V>, should_update: &ShouldUpdateFn<V>) -> bool {
        self.shard(record.primary).set(record, should_update)
    }

    pub fn update_in_place(&self, record: &StoreRecord<V>, should_update: &ShouldUpdateFn<V>) -> bool {
        self.shard(record.primary).update_in_place(record, should_update)
    }

    pub fn delete(&self, primary: u64, conflict: u64) -> Option<StoreRecord<V>> {
        self.shard(primary).delete(primary, conflict)
    }

    pub fn remove_by_primary(&self, primary: u64) -> Option<StoreRecord<V>> {
        self.shard(primary).remove_by_primary(primary)
    }

    pub fn clear<F: FnMut(StoreRecord<V>)>(&self, mut on_evict: F) {
        for shard in &self.shards {
            shard.clear(|record| on_evict(record));
        }
    }

    /// Iterates shards in sequence; within each, the shared lock is
    /// held while delivering records. `f` may stop iteration early by
    /// returning `false`.
    pub fn iter<F: FnMut(&StoreRecord<V>) -> bool>(&self, mut f: F) {
        for shard in &self.shards {
            let mut stop = false;
            shard.iter(|record| {
                if !f(record) {
                    stop = true;
                    false
                } else {
                    true
                }
            });
            if stop {
                return;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }
}
