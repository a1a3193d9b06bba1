//! The writer task (spec §4.9): a single consumer of the set channel
//! that serializes every admission, eviction, update and delete, and
//! drives the periodic TTL sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::expire::{self, ExpirationIndex};
use crate::metrics::Metrics;
use crate::policy::Policy;
use crate::store::record::now_epoch_secs;
use crate::store::{ShouldUpdateFn, Store, StoreRecord};

/// Fixed per-record bookkeeping overhead added to the user-supplied
/// cost unless `ignore_internal_cost` is set (spec §4.9, §6). 64 bytes
/// is the same order of magnitude as the struct itself plus hash-map
/// bucket overhead.
const INTERNAL_RECORD_COST: i64 = 64;

/// Default depth of the set channel: 32 producer slots per shard,
/// times 1024 (spec §5).
pub const DEFAULT_SET_CHANNEL_CAPACITY: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFlag {
    New,
    Update,
    Delete,
    SyncBarrier,
}

/// A mutation message posted to the set channel (spec §3).
pub struct Item<V> {
    pub flag: ItemFlag,
    pub primary: u64,
    pub conflict: u64,
    pub value: Option<V>,
    pub cost: i64,
    pub expiration: u64,
    /// Only present on a `SyncBarrier`: signalled once every item
    /// enqueued before it has been applied.
    pub barrier: Option<oneshot::Sender<()>>,
}

impl<V> Item<V> {
    pub fn new(primary: u64, conflict: u64, value: V, cost: i64, expiration: u64) -> Self {
        Self {
            flag: ItemFlag::New,
            primary,
            conflict,
            value: Some(value),
            cost,
            expiration,
            barrier: None,
        }
    }

    pub fn update(primary: u64, conflict: u64, value: V, cost: i64, expiration: u64) -> Self {
        Self {
            flag: ItemFlag::Update,
            primary,
            conflict,
            value: Some(value),
            cost,
            expiration,
            barrier: None,
        }
    }

    pub fn delete(primary: u64, conflict: u64) -> Self {
        Self {
            flag: ItemFlag::Delete,
            primary,
            conflict,
            value: None,
            cost: 0,
            expiration: 0,
            barrier: None,
        }
    }

    pub fn sync_barrier(signal: oneshot::Sender<()>) -> Self {
        Self {
            flag: ItemFlag::SyncBarrier,
            primary: 0,
            conflict: 0,
            value: None,
            cost: 0,
            expiration: 0,
            barrier: Some(signal),
        }
    }
}

pub type OnEvict<V> = Arc<dyn Fn(u64, u64, V, i64) + Send + Sync>;
pub type OnReject<V> = Arc<dyn Fn(u64, u64, Option<V>, i64) + Send + Sync>;
pub type OnExit<V> = Arc<dyn Fn(u64, u64, V) + Send + Sync>;
pub type CostFn<V> = Arc<dyn Fn(&V) -> i64 + Send + Sync>;

/// Everything the writer task needs that isn't a channel or a handle
/// to one of the other components.
pub struct CoordinatorConfig<V> {
    pub ignore_internal_cost: bool,
    pub should_update: ShouldUpdateFn<V>,
    pub cost_fn: Option<CostFn<V>>,
    pub on_evict: Option<OnEvict<V>>,
    pub on_reject: Option<OnReject<V>>,
    pub on_exit: Option<OnExit<V>>,
}

/// Spawns the writer task and returns a sender for posting `Item`s to
/// it. The task runs until `stop` is cancelled, at which point it
/// drains whatever is already queued and exits.
pub fn spawn<V>(
    config: CoordinatorConfig<V>,
    store: Arc<Store<V>>,
    policy: Arc<Policy>,
    expiry: Arc<ExpirationIndex>,
    metrics: Arc<Metrics>,
    set_channel_capacity: usize,
    stop: CancellationToken,
) -> mpsc::Sender<Item<V>>
where
    V: Clone + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Item<V>>(set_channel_capacity.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(
            expire::BUCKET_WIDTH_SECS * 1000 / 2,
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    rx.close();
                    while let Ok(item) = rx.try_recv() {
                        handle_item(item, &store, &policy, &config, &metrics);
                    }
                    break;
                }

                maybe_item = rx.recv() => {
                    match maybe_item {
                        Some(item) => handle_item(item, &store, &policy, &config, &metrics),
                        None => break,
                    }
                }

                _ = ticker.tick() => {
                    sweep(&store, &policy, &expiry, &metrics, config.on_evict.as_ref());
                }
            }
        }

        debug!("coordinator writer task stopped");
    });

    tx
}

fn effective_cost<V>(item: &Item<V>, cost_fn: &Option<CostFn<V>>, ignore_internal_cost: bool) -> i64 {
    let mut cost = item.cost;
    if cost == 0 && item.flag != ItemFlag::Delete {
        if let (Some(f), Some(value)) = (cost_fn, item.value.as_ref()) {
            cost = f(value);
        }
    }
    if !ignore_internal_cost {
        cost = cost.saturating_add(INTERNAL_RECORD_COST);
    }
    cost
}

fn handle_item<V: Clone>(item: Item<V>, store: &Store<V>, policy: &Policy, config: &CoordinatorConfig<V>, metrics: &Metrics) {
    match item.flag {
        ItemFlag::SyncBarrier => {
            if let Some(signal) = item.barrier {
                let _ = signal.send(());
            }
        }

        ItemFlag::New => {
            let cost = effective_cost(&item, &config.cost_fn, config.ignore_internal_cost);
            let (victims, admitted) = policy.add(item.primary, cost);

            if admitted {
                if let Some(value) = item.value {
                    let record = StoreRecord {
                        primary: item.primary,
                        conflict: item.conflict,
                        value,
                        cost,
                        expiration: item.expiration,
                        admitted_at: now_epoch_secs(),
                    };
                    store.set(record, &config.should_update);
                }
            } else if let Some(cb) = &config.on_reject {
                cb(item.primary, item.conflict, item.value, cost);
            }

            for victim_primary in victims {
                if let Some(record) = store.remove_by_primary(victim_primary) {
                    let lived = now_epoch_secs().saturating_sub(record.admitted_at);
                    metrics.record_life_expectancy(lived);
                    if let Some(cb) = &config.on_evict {
                        cb(record.primary, record.conflict, record.value, record.cost);
                    }
                }
            }
        }

        ItemFlag::Update => {
            let cost = effective_cost(&item, &config.cost_fn, config.ignore_internal_cost);
            policy.update(item.primary, cost);
        }

        ItemFlag::Delete => {
            policy.delete(item.primary);
            if let Some(record) = store.delete(item.primary, item.conflict) {
                if let Some(cb) = &config.on_exit {
                    cb(record.primary, record.conflict, record.value);
                }
            }
        }
    }
}

fn sweep<V: Clone>(store: &Store<V>, policy: &Policy, expiry: &ExpirationIndex, metrics: &Metrics, on_evict: Option<&OnEvict<V>>) {
    expiry.cleanup(now_epoch_secs(), |primary, conflict| {
        if let Some(record) = store.delete(primary, conflict) {
            let cost = policy.cost(primary).unwrap_or(record.cost);
            policy.delete(primary);
            let lived = now_epoch_secs().saturating_sub(record.admitted_at);
            metrics.record_life_expectancy(lived);
            if let Some(cb) = on_evict {
                cb(record.primary, record.conflict, record.value, cost);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    fn always_update<V>() -> ShouldUpdateFn<V> {
        Arc::new(|_, _| true)
    }

    fn harness() -> (Arc<Store<String>>, Arc<Policy>, Arc<ExpirationIndex>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new(true));
        let expiry = Arc::new(ExpirationIndex::new());
        let store = Arc::new(Store::new(expiry.clone(), metrics.clone()));
        let policy = Arc::new(Policy::new(1024, 1000, 0.01, 5, metrics.clone()));
        (store, policy, expiry, metrics)
    }

    fn config(
        on_evict: Option<OnEvict<String>>,
        on_reject: Option<OnReject<String>>,
        on_exit: Option<OnExit<String>>,
    ) -> CoordinatorConfig<String> {
        CoordinatorConfig {
            ignore_internal_cost: true,
            should_update: always_update(),
            cost_fn: None,
            on_evict,
            on_reject,
            on_exit,
        }
    }

    #[tokio::test]
    async fn new_item_that_is_admitted_lands_in_the_store() {
        let (store, policy, _expiry, metrics) = harness();
        let cfg = config(None, None, None);
        handle_item(Item::new(1, 10, "v".to_string(), 1, 0), &store, &policy, &cfg, &metrics);
        assert_eq!(store.get(1, 10), Some("v".to_string()));
    }

    #[tokio::test]
    async fn rejected_item_invokes_on_reject_and_is_not_stored() {
        let (store, policy, _expiry, metrics) = harness();
        let rejected = Arc::new(Mutex::new(Vec::new()));
        let rejected_clone = rejected.clone();
        let cfg = config(
            None,
            Some(Arc::new(move |p, _c, v, _cost| rejected_clone.lock().unwrap().push((p, v)))),
            None,
        );
        handle_item(Item::new(1, 10, "v".to_string(), 10_000, 0), &store, &policy, &cfg, &metrics);
        assert_eq!(store.get(1, 10), None);
        assert_eq!(rejected.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_invokes_on_exit_with_the_removed_value() {
        let (store, policy, _expiry, metrics) = harness();
        let exited = Arc::new(Mutex::new(None));
        let exited_clone = exited.clone();
        let cfg = config(None, None, Some(Arc::new(move |_p, _c, v| *exited_clone.lock().unwrap() = Some(v))));
        handle_item(Item::new(1, 10, "v".to_string(), 1, 0), &store, &policy, &cfg, &metrics);
        handle_item(Item::delete(1, 10), &store, &policy, &cfg, &metrics);
        assert_eq!(store.get(1, 10), None);
        assert_eq!(*exited.lock().unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn sync_barrier_signals_its_oneshot() {
        let (store, policy, _expiry, metrics) = harness();
        let cfg = config(None, None, None);
        let (tx, rx) = oneshot::channel();
        handle_item(Item::sync_barrier(tx), &store, &policy, &cfg, &metrics);
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn sweep_evicts_expired_entries_and_reports_cost() {
        let (store, policy, expiry, metrics) = harness();
        policy.add(1, 5);

        let t0 = now_epoch_secs();
        store.set(
            StoreRecord { primary: 1, conflict: 10, value: "v".to_string(), cost: 5, expiration: t0, admitted_at: 0 },
            &always_update(),
        );
        expiry.cleanup(t0, |_, _| {}); // establishes the baseline at t0's bucket
        expiry.add(1, 10, t0);

        // Wait for wall-clock time to cross into the next 5s bucket so
        // the sweep actually has a window to walk.
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        let evicted = Arc::new(AtomicU64::new(u64::MAX));
        let evicted_clone = evicted.clone();
        sweep(
            &store,
            &policy,
            &expiry,
            &metrics,
            Some(&(Arc::new(move |p, _c, _v, _cost| {
                evicted_clone.store(p, Ordering::Relaxed);
            }) as OnEvict<String>)),
        );

        assert_eq!(evicted.load(Ordering::Relaxed), 1);
        assert_eq!(store.get(1, 10), None);
        assert_eq!(policy.cost(1), None);
    }
}
