//! Public surface: `CacheBuilder` and `Cache` (spec §6).

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{self, CoordinatorConfig, CostFn, Item, OnEvict, OnExit, OnReject};
use crate::error::CacheBuildError;
use crate::expire::ExpirationIndex;
use crate::hash::{default_hasher, HashFn};
use crate::metrics::{MetricKind, Metrics, MetricsSnapshot};
use crate::policy::Policy;
use crate::ring::{self, Ring};
use crate::store::record::now_epoch_secs;
use crate::store::{ShouldUpdateFn, Store, StoreRecord};

/// Fluent construction (spec §6). All setters are optional except the
/// two required by `new`; `build()` validates and fails with a
/// [`CacheBuildError`] rather than panicking.
pub struct CacheBuilder<K, V> {
    num_counters: usize,
    max_cost: i64,
    buffer_items: usize,
    metrics: bool,
    ignore_internal_cost: bool,
    sample_size: usize,
    doorkeeper_fpr: f64,
    set_channel_capacity: usize,
    key_to_hash: Option<HashFn<K>>,
    cost_fn: Option<CostFn<V>>,
    should_update: Option<ShouldUpdateFn<V>>,
    on_evict: Option<OnEvict<V>>,
    on_reject: Option<OnReject<V>>,
    on_exit: Option<OnExit<V>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(num_counters: usize, max_cost: i64) -> Self {
        Self {
            num_counters,
            max_cost,
            buffer_items: 64,
            metrics: false,
            ignore_internal_cost: false,
            sample_size: 5,
            doorkeeper_fpr: 0.01,
            set_channel_capacity: coordinator::DEFAULT_SET_CHANNEL_CAPACITY,
            key_to_hash: None,
            cost_fn: None,
            should_update: None,
            on_evict: None,
            on_reject: None,
            on_exit: None,
        }
    }

    pub fn buffer_items(mut self, n: usize) -> Self {
        self.buffer_items = n;
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    pub fn ignore_internal_cost(mut self, ignore: bool) -> Self {
        self.ignore_internal_cost = ignore;
        self
    }

    /// Defaults to 5 (spec §4.5's sampled-LFU victim pool size).
    pub fn sample_size(mut self, n: usize) -> Self {
        self.sample_size = n;
        self
    }

    /// Defaults to 1% (spec §4.4's doorkeeper).
    pub fn doorkeeper_fpr(mut self, fpr: f64) -> Self {
        self.doorkeeper_fpr = fpr;
        self
    }

    pub fn set_channel_capacity(mut self, n: usize) -> Self {
        self.set_channel_capacity = n;
        self
    }

    pub fn key_to_hash(mut self, f: HashFn<K>) -> Self {
        self.key_to_hash = Some(f);
        self
    }

    pub fn cost_fn(mut self, f: CostFn<V>) -> Self {
        self.cost_fn = Some(f);
        self
    }

    pub fn should_update(mut self, f: ShouldUpdateFn<V>) -> Self {
        self.should_update = Some(f);
        self
    }

    pub fn on_evict(mut self, f: OnEvict<V>) -> Self {
        self.on_evict = Some(f);
        self
    }

    pub fn on_reject(mut self, f: OnReject<V>) -> Self {
        self.on_reject = Some(f);
        self
    }

    pub fn on_exit(mut self, f: OnExit<V>) -> Self {
        self.on_exit = Some(f);
        self
    }

    /// Builds the cache. Must run inside a tokio runtime: the writer
    /// task and the policy's batched-access drain task are both
    /// spawned here (spec §4.9, §5).
    pub fn build(self) -> Result<Cache<K, V>, CacheBuildError> {
        if self.num_counters == 0 {
            return Err(CacheBuildError::InvalidNumCounters);
        }
        if self.max_cost <= 0 {
            return Err(CacheBuildError::InvalidMaxCost);
        }
        if self.buffer_items == 0 {
            return Err(CacheBuildError::InvalidBufferItems);
        }
        if self.sample_size == 0 {
            return Err(CacheBuildError::InvalidSampleSize);
        }
        if !(self.doorkeeper_fpr > 0.0 && self.doorkeeper_fpr < 1.0) {
            return Err(CacheBuildError::InvalidDoorkeeperFpr);
        }

        let metrics = Arc::new(Metrics::new(self.metrics));
        let expiry = Arc::new(ExpirationIndex::new());
        let store = Arc::new(Store::new(expiry.clone(), metrics.clone()));
        let policy = Arc::new(Policy::new(
            self.num_counters,
            self.max_cost,
            self.doorkeeper_fpr,
            self.sample_size,
            metrics.clone(),
        ));
        let ring = Arc::new(Ring::new(ring::default_stripe_count(), self.buffer_items));
        let should_update = self.should_update.unwrap_or_else(|| Arc::new(|_, _| true));
        let key_to_hash = self.key_to_hash.unwrap_or_else(|| default_hasher::<K>());
        let stop = CancellationToken::new();

        let set_tx = coordinator::spawn(
            CoordinatorConfig {
                ignore_internal_cost: self.ignore_internal_cost,
                should_update: should_update.clone(),
                cost_fn: self.cost_fn,
                on_evict: self.on_evict,
                on_reject: self.on_reject,
                on_exit: self.on_exit,
            },
            store.clone(),
            policy.clone(),
            expiry.clone(),
            metrics.clone(),
            self.set_channel_capacity,
            stop.clone(),
        );

        Ok(Cache {
            key_to_hash,
            store,
            policy,
            ring,
            set_tx,
            should_update,
            metrics,
            closed: Arc::new(AtomicBool::new(false)),
            stop,
            _marker: PhantomData,
        })
    }
}

/// A concurrent, memory-bounded, in-process key-value cache (spec §2).
///
/// Cloning is cheap: every field is an `Arc` or `Copy` handle, so a
/// `Cache` can be shared across threads by cloning it rather than
/// wrapping it in an outer `Arc`.
pub struct Cache<K, V> {
    key_to_hash: HashFn<K>,
    store: Arc<Store<V>>,
    policy: Arc<Policy>,
    ring: Arc<Ring>,
    set_tx: mpsc::Sender<Item<V>>,
    should_update: ShouldUpdateFn<V>,
    metrics: Arc<Metrics>,
    closed: Arc<AtomicBool>,
    stop: CancellationToken,
    _marker: PhantomData<K>,
}

/// Every field is an `Arc`, a channel handle, or a `CancellationToken`
/// — cloning a `Cache` is a handful of refcount bumps, not a copy of
/// its contents (spec §2: the cache is shared across caller threads).
impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            key_to_hash: self.key_to_hash.clone(),
            store: self.store.clone(),
            policy: self.policy.clone(),
            ring: self.ring.clone(),
            set_tx: self.set_tx.clone(),
            should_update: self.should_update.clone(),
            metrics: self.metrics.clone(),
            closed: self.closed.clone(),
            stop: self.stop.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash,
    V: Clone,
{
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if self.is_closed() {
            return None;
        }
        let h = (self.key_to_hash)(key);
        self.ring.push(h.primary, &self.policy);
        self.store.get(h.primary, h.conflict)
    }

    pub fn set(&self, key: &K, value: V, cost: i64) -> bool {
        self.set_with_expiration(key, value, cost, 0)
    }

    /// Negative `ttl_millis` is a no-op returning false; zero means
    /// never expires (spec §6).
    pub fn set_with_ttl(&self, key: &K, value: V, cost: i64, ttl_millis: i64) -> bool {
        if ttl_millis < 0 {
            return false;
        }
        if ttl_millis == 0 {
            return self.set_with_expiration(key, value, cost, 0);
        }
        let expiration = now_epoch_secs() + ((ttl_millis + 999) / 1000) as u64;
        self.set_with_expiration(key, value, cost, expiration)
    }

    fn set_with_expiration(&self, key: &K, value: V, cost: i64, expiration: u64) -> bool {
        if self.is_closed() {
            return false;
        }
        let h = (self.key_to_hash)(key);
        let probe = StoreRecord {
            primary: h.primary,
            conflict: h.conflict,
            value: value.clone(),
            cost,
            expiration,
            admitted_at: now_epoch_secs(),
        };
        let updated_in_place = self.store.update_in_place(&probe, &self.should_update);
        let item = if updated_in_place {
            Item::update(h.primary, h.conflict, value, cost, expiration)
        } else {
            Item::new(h.primary, h.conflict, value, cost, expiration)
        };
        self.post(item, updated_in_place)
    }

    /// Update-only: no-op (returns false) if the key is not already
    /// present (spec §6).
    pub fn set_if_present(&self, key: &K, value: V, cost: i64) -> bool {
        if self.is_closed() {
            return false;
        }
        let h = (self.key_to_hash)(key);
        let probe = StoreRecord {
            primary: h.primary,
            conflict: h.conflict,
            value: value.clone(),
            cost,
            expiration: 0,
            admitted_at: now_epoch_secs(),
        };
        if !self.store.update_in_place(&probe, &self.should_update) {
            return false;
        }
        self.post(Item::update(h.primary, h.conflict, value, cost, 0), true)
    }

    /// Posts a mutation to the writer task. A full channel drops the
    /// item and reports failure, unless the store was already updated
    /// synchronously on the fast path — the set still "happened" from
    /// the caller's perspective (spec §4.9).
    fn post(&self, item: Item<V>, updated_in_place: bool) -> bool {
        match self.set_tx.try_send(item) {
            Ok(()) => true,
            Err(_) => {
                if updated_in_place {
                    true
                } else {
                    self.metrics.record(MetricKind::SetsDropped, 0, 1);
                    false
                }
            }
        }
    }

    pub fn delete(&self, key: &K) {
        if self.is_closed() {
            return;
        }
        let h = (self.key_to_hash)(key);
        let _ = self.set_tx.try_send(Item::delete(h.primary, h.conflict));
    }

    /// `Some(Duration::ZERO)` means present with no expiration.
    pub fn get_ttl(&self, key: &K) -> Option<Duration> {
        if self.is_closed() {
            return None;
        }
        let h = (self.key_to_hash)(key);
        let expiration = self.store.expiration(h.primary, h.conflict)?;
        if expiration == crate::store::record::NO_EXPIRATION {
            return Some(Duration::ZERO);
        }
        let now = now_epoch_secs();
        if expiration <= now {
            return None;
        }
        Some(Duration::from_secs(expiration - now))
    }

    /// Blocks until every item enqueued before this call has been
    /// applied by the writer task (spec §5's only ordering fence).
    /// Unlike `set`/`delete`, the barrier is sent with a blocking
    /// `send` rather than `try_send`: a dropped barrier would make
    /// `wait` lie about having synchronized.
    pub async fn wait(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        if self.set_tx.send(Item::sync_barrier(tx)).await.is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    fn clear_impl(&self) {
        self.policy.clear();
        self.store.clear(|_record| {});
        self.metrics.clear();
    }

    /// Removes all entries and resets metrics and policy state. No-op
    /// once closed.
    pub fn clear(&self) {
        if self.is_closed() {
            return;
        }
        self.clear_impl();
    }

    /// Clears, then stops the writer task. Idempotent (spec §6, §8).
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear_impl();
        self.stop.cancel();
        self.policy.close();
    }

    pub fn max_cost(&self) -> i64 {
        self.policy.max_cost()
    }

    /// Does not itself evict, even if the new ceiling is below current
    /// usage — the next admission attempt does the work (spec §9).
    pub fn update_max_cost(&self, new_max_cost: i64) {
        if self.is_closed() {
            return;
        }
        self.policy.update_max_cost(new_max_cost);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
