//! A single shard of the sharded store: an independent `{primary ->
//! StoreRecord}` map under its own read/write lock (spec §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::record::{now_epoch_secs, StoreRecord};
use crate::expire::ExpirationIndex;

/// Decides whether an update should be applied when a key already
/// exists. Default: always apply.
pub type ShouldUpdateFn<V> = Arc<dyn Fn(&V, &V) -> bool + Send + Sync>;

pub struct Shard<V> {
    data: RwLock<HashMap<u64, StoreRecord<V>>>,
    expiry: Arc<ExpirationIndex>,
}

impl<V: Clone> Shard<V> {
    pub fn new(expiry: Arc<ExpirationIndex>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            expiry,
        }
    }

    /// Shared lock; rejects on conflict mismatch or lapsed expiration
    /// (the bucketized sweep may lag a real record's exact expiry —
    /// this keeps the overshoot invisible to callers, spec §4.8).
    pub fn get(&self, primary: u64, conflict: u64) -> Option<V> {
        let data = self.data.read();
        let record = data.get(&primary)?;
        if record.conflict != conflict {
            return None;
        }
        if record.is_expired_at(now_epoch_secs()) {
            return None;
        }
        Some(record.value.clone())
    }

    /// Conflict-checked: a mismatch is treated as absent, same as `get`.
    pub fn expiration(&self, primary: u64, conflict: u64) -> Option<u64> {
        let data = self.data.read();
        let record = data.get(&primary)?;
        (record.conflict == conflict).then_some(record.expiration)
    }

    pub fn cost(&self, primary: u64) -> Option<i64> {
        self.data.read().get(&primary).map(|r| r.cost)
    }

    /// Inserts a brand-new record, or replaces an existing one whose
    /// conflict matches and whose `should_update` predicate accepts
    /// the transition. Returns true if the record is now stored.
    pub fn set(&self, record: StoreRecord<V>, should_update: &ShouldUpdateFn<V>) -> bool {
        let mut data = self.data.write();
        match data.get(&record.primary) {
            Some(prev) if prev.conflict == record.conflict => {
                if !should_update(&prev.value, &record.value) {
                    return false;
                }
                self.expiry.delete(record.primary, prev.expiration);
                self.expiry.add(record.primary, record.conflict, record.expiration);
                data.insert(record.primary, record);
                true
            }
            Some(_) => false, // conflict mismatch: leave existing record untouched
            None => {
                self.expiry.add(record.primary, record.conflict, record.expiration);
                data.insert(record.primary, record);
                true
            }
        }
    }

    /// Updates an existing entry in place (fast path for `set`/`Update`
    /// items). Returns true only if a matching record existed.
    pub fn update_in_place(&self, record: &StoreRecord<V>, should_update: &ShouldUpdateFn<V>) -> bool {
        let mut data = self.data.write();
        let Some(prev) = data.get(&record.primary) else {
            return false;
        };
        if prev.conflict != record.conflict {
            return false;
        }
        if !should_update(&prev.value, &record.value) {
            return false;
        }
        let old_expiration = prev.expiration;
        self.expiry.delete(record.primary, old_expiration);
        self.expiry.add(record.primary, record.conflict, record.expiration);
        data.insert(record.primary, record.clone());
        true
    }

    /// Removes on conflict match, returning the removed record (so
    /// callers can recover its cost and admission time, e.g. for the
    /// life-expectancy histogram on a TTL sweep).
    pub fn delete(&self, primary: u64, conflict: u64) -> Option<StoreRecord<V>> {
        let mut data = self.data.write();
        let record = data.get(&primary)?;
        if record.conflict != conflict {
            return None;
        }
        let record = data.remove(&primary).unwrap();
        self.expiry.delete(primary, record.expiration);
        Some(record)
    }

    /// Removes a record regardless of conflict — used to apply
    /// eviction victims chosen by the policy, whose conflict the
    /// caller never had to track (spec §4.9).
    pub fn remove_by_primary(&self, primary: u64) -> Option<StoreRecord<V>> {
        let mut data = self.data.write();
        let record = data.remove(&primary)?;
        self.expiry.delete(primary, record.expiration);
        Some(record)
    }

    pub fn clear<F: FnMut(StoreRecord<V>)>(&self, mut on_evict: F) {
        let mut data = self.data.write();
        for (_, record) in data.drain() {
            self.expiry.delete(record.primary, record.expiration);
            on_evict(record);
        }
    }

    /// Iterates live records while holding the shared lock; `f`
    /// returns `false` to stop iteration early.
    pub fn iter<F: FnMut(&StoreRecord<V>) -> bool>(&self, mut f: F) {
        let data = self.data.read();
        for record in data.values() {
            if !f(record) {
                return;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }
}
