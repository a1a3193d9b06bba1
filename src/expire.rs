//! Bucketized expiration index: 5-second buckets, swept periodically
//! by the coordinator (spec §4.8).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::store::record::NO_EXPIRATION;

pub const BUCKET_WIDTH_SECS: u64 = 5;

/// Guards against a corrupted `last_cleaned` (e.g. a clock jump)
/// walking an unbounded number of buckets.
const MAX_SAFE_WINDOW_BUCKETS: u64 = 100_000;

pub fn bucket_index(epoch_secs: u64) -> u64 {
    epoch_secs / BUCKET_WIDTH_SECS
}

pub struct ExpirationIndex {
    buckets: Mutex<HashMap<u64, HashMap<u64, u64>>>,
    last_cleaned: AtomicU64,
}

impl ExpirationIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            last_cleaned: AtomicU64::new(0),
        }
    }

    /// No-op when `expiration` is `NO_EXPIRATION` (never expires).
    pub fn add(&self, primary: u64, conflict: u64, expiration: u64) {
        if expiration == NO_EXPIRATION {
            return;
        }
        let bucket = bucket_index(expiration);
        self.buckets.lock().entry(bucket).or_default().insert(primary, conflict);
    }

    pub fn delete(&self, primary: u64, expiration: u64) {
        if expiration == NO_EXPIRATION {
            return;
        }
        let bucket = bucket_index(expiration);
        let mut buckets = self.buckets.lock();
        if let Some(entries) = buckets.get_mut(&bucket) {
            entries.remove(&primary);
            if entries.is_empty() {
                buckets.remove(&bucket);
            }
        }
    }

    pub fn update(&self, primary: u64, conflict: u64, old_expiration: u64, new_expiration: u64) {
        self.delete(primary, old_expiration);
        self.add(primary, conflict, new_expiration);
    }

    /// Walks every bucket from `last_cleaned + 1` up to `current - 1`
    /// (inclusive), handing every `(primary, conflict)` pair in each
    /// to `on_bucket_entry`. Returns the number of buckets processed.
    pub fn cleanup<F: FnMut(u64, u64)>(&self, current_epoch_secs: u64, mut on_bucket_entry: F) -> u64 {
        let current_bucket = bucket_index(current_epoch_secs);
        let last = self.last_cleaned.load(Ordering::Relaxed);

        if last == 0 {
            // First run: nothing has a documented "since" point yet.
            self.last_cleaned.store(current_bucket.saturating_sub(1), Ordering::Relaxed);
            return 0;
        }

        if current_bucket <= last {
            return 0;
        }

        let window = current_bucket - last;
        if window > MAX_SAFE_WINDOW_BUCKETS {
            self.last_cleaned.store(current_bucket.saturating_sub(1), Ordering::Relaxed);
            return 0;
        }

        let mut processed = 0u64;
        for bucket in (last + 1)..current_bucket {
            let entries = self.buckets.lock().remove(&bucket);
            if let Some(entries) = entries {
                for (primary, conflict) in entries {
                    on_bucket_entry(primary, conflict);
                }
            }
            processed += 1;
        }

        self.last_cleaned.store(current_bucket.saturating_sub(1), Ordering::Relaxed);
        processed
    }

    #[cfg(test)]
    pub fn bucket_len(&self, bucket: u64) -> usize {
        self.buckets.lock().get(&bucket).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for ExpirationIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_noop_for_zero_expiration() {
        let idx = ExpirationIndex::new();
        idx.add(1, 10, NO_EXPIRATION);
        assert_eq!(idx.bucket_len(0), 0);
    }

    #[test]
    fn add_then_delete_empties_the_bucket() {
        let idx = ExpirationIndex::new();
        idx.add(1, 10, 100);
        assert_eq!(idx.bucket_len(bucket_index(100)), 1);
        idx.delete(1, 100);
        assert_eq!(idx.bucket_len(bucket_index(100)), 0);
    }

    #[test]
    fn update_moves_between_buckets() {
        let idx = ExpirationIndex::new();
        idx.add(1, 10, 100);
        idx.update(1, 10, 100, 1000);
        assert_eq!(idx.bucket_len(bucket_index(100)), 0);
        assert_eq!(idx.bucket_len(bucket_index(1000)), 1);
    }

    #[test]
    fn first_cleanup_call_only_establishes_a_baseline() {
        let idx = ExpirationIndex::new();
        idx.add(1, 10, 100);
        let processed = idx.cleanup(1_000_000, |_, _| panic!("should not visit on first call"));
        assert_eq!(processed, 0);
    }

    #[test]
    fn cleanup_visits_expired_buckets_once_baseline_set() {
        let idx = ExpirationIndex::new();
        idx.cleanup(100, |_, _| {}); // establish baseline
        idx.add(1, 10, 105);
        idx.add(2, 20, 106);

        let mut seen = Vec::new();
        let processed = idx.cleanup(1_000, |primary, conflict| seen.push((primary, conflict)));

        assert!(processed > 0);
        assert!(seen.contains(&(1, 10)));
        assert!(seen.contains(&(2, 20)));
    }

    #[test]
    fn corrupted_window_resets_instead_of_walking_forever() {
        let idx = ExpirationIndex::new();
        idx.cleanup(100, |_, _| {}); // baseline at bucket ~19
        // A huge forward clock jump must not walk millions of buckets.
        let processed = idx.cleanup(100 + MAX_SAFE_WINDOW_BUCKETS * BUCKET_WIDTH_SECS * 2, |_, _| {
            panic!("must not visit any bucket on a corrupted window")
        });
        assert_eq!(processed, 0);
    }
}
