//! The record type held inside each shard (spec §3, `StoreRecord`).

/// `0` means "never expires" (spec §3/§4.8).
pub const NO_EXPIRATION: u64 = 0;

#[derive(Clone)]
pub struct StoreRecord<V> {
    pub primary: u64,
    pub conflict: u64,
    pub value: V,
    pub cost: i64,
    /// Epoch seconds; `NO_EXPIRATION` means never.
    pub expiration: u64,
    /// Epoch seconds this record was (re-)admitted — used for the
    /// life-expectancy histogram when it is eventually evicted.
    pub admitted_at: u64,
}

impl<V> StoreRecord<V> {
    pub fn is_expired_at(&self, now_epoch_secs: u64) -> bool {
        self.expiration != NO_EXPIRATION && self.expiration <= now_epoch_secs
    }
}

/// Current wall-clock time as whole seconds since the Unix epoch.
pub fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
