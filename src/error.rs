//! Construction errors (spec §7). Every other public method reports
//! failure via a boolean or `Option`, never a `Result` — the runtime
//! surface stays exception-free by design.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheBuildError {
    #[error("num_counters must be > 0")]
    InvalidNumCounters,

    #[error("max_cost must be > 0")]
    InvalidMaxCost,

    #[error("buffer_items must be > 0")]
    InvalidBufferItems,

    #[error("sample_size must be > 0")]
    InvalidSampleSize,

    #[error("doorkeeper_fpr must be in (0, 1)")]
    InvalidDoorkeeperFpr,
}
