//! Cost ledger: tracks `{primary -> cost}` and the running `used`
//! total against an atomic `max_cost` ceiling (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use rand::seq::IteratorRandom;

pub struct Ledger {
    entries: HashMap<u64, i64>,
    used: i64,
    max_cost: AtomicI64,
}

impl Ledger {
    pub fn new(max_cost: i64) -> Self {
        Self {
            entries: HashMap::new(),
            used: 0,
            max_cost: AtomicI64::new(max_cost),
        }
    }

    pub fn max_cost(&self) -> i64 {
        self.max_cost.load(Ordering::Relaxed)
    }

    /// Swaps in a new ceiling. Does not itself evict anything — the
    /// next `add`'s eviction loop naturally reconciles an over-budget
    /// ledger (spec G).
    pub fn update_max_cost(&self, new_max_cost: i64) {
        self.max_cost.store(new_max_cost, Ordering::Relaxed);
    }

    pub fn used(&self) -> i64 {
        self.used
    }

    pub fn cost(&self, primary: u64) -> Option<i64> {
        self.entries.get(&primary).copied()
    }

    pub fn has(&self, primary: u64) -> bool {
        self.entries.contains_key(&primary)
    }

    pub fn add(&mut self, primary: u64, cost: i64) {
        self.entries.insert(primary, cost);
        self.used += cost;
    }

    pub fn delete(&mut self, primary: u64) -> Option<i64> {
        let cost = self.entries.remove(&primary)?;
        self.used -= cost;
        Some(cost)
    }

    /// Atomically updates the cost of an already-present key, keeping
    /// `used` consistent. Returns false (no-op) if the key is absent.
    pub fn update_if_has(&mut self, primary: u64, cost: i64) -> bool {
        if let Some(old) = self.entries.get_mut(&primary) {
            self.used += cost - *old;
            *old = cost;
            true
        } else {
            false
        }
    }

    /// `max_cost - (used + cost)`; may be negative.
    pub fn room_left(&self, cost: i64) -> i64 {
        self.max_cost() - (self.used + cost)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.used = 0;
    }

    /// Appends random `(primary, cost)` pairs not already present in
    /// `accumulator` until it reaches `target_n` or the ledger is
    /// exhausted. Order is unspecified (spec §4.4).
    pub fn fill_sample(&self, accumulator: &mut Vec<(u64, i64)>, target_n: usize) {
        if accumulator.len() >= target_n {
            return;
        }
        let excluded: std::collections::HashSet<u64> =
            accumulator.iter().map(|(k, _)| *k).collect();

        let mut rng = rand::thread_rng();
        let needed = target_n - accumulator.len();
        let picks = self
            .entries
            .iter()
            .filter(|(k, _)| !excluded.contains(*k))
            .choose_multiple(&mut rng, needed);

        for (primary, cost) in picks {
            accumulator.push((*primary, *cost));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_increments_used() {
        let mut l = Ledger::new(100);
        l.add(1, 10);
        l.add(2, 5);
        assert_eq!(l.used(), 15);
    }

    #[test]
    fn delete_decrements_used_and_removes() {
        let mut l = Ledger::new(100);
        l.add(1, 10);
        assert_eq!(l.delete(1), Some(10));
        assert_eq!(l.used(), 0);
        assert!(!l.has(1));
    }

    #[test]
    fn update_if_has_adjusts_used_only_on_hit() {
        let mut l = Ledger::new(100);
        l.add(1, 10);
        assert!(l.update_if_has(1, 30));
        assert_eq!(l.used(), 30);
        assert!(!l.update_if_has(2, 5));
        assert_eq!(l.used(), 30);
    }

    #[test]
    fn room_left_can_go_negative() {
        let l = Ledger::new(10);
        assert_eq!(l.room_left(5), 5);
        assert_eq!(l.room_left(20), -10);
    }

    #[test]
    fn fill_sample_stops_at_target_or_exhaustion() {
        let mut l = Ledger::new(1000);
        for i in 0..3u64 {
            l.add(i, 1);
        }
        let mut acc = Vec::new();
        l.fill_sample(&mut acc, 10);
        assert_eq!(acc.len(), 3); // ledger exhausted before target
    }

    #[test]
    fn update_max_cost_does_not_evict() {
        let mut l = Ledger::new(100);
        l.add(1, 90);
        l.update_max_cost(10);
        assert_eq!(l.used(), 90);
        assert_eq!(l.max_cost(), 10);
    }
}
