//! Parallel row processing.
//!
//! Each worker task owns one [`ActivationWorker`], and with it one
//! credential cache. Rows arrive through a bounded channel shared by all
//! workers; there is no ordering across rows.

mod activation;
mod pool;

pub use activation::{ActivationWorker, RowResult, WorkerError};
pub use pool::{PoolError, WorkerPool};

use std::ops::AddAssign;

use serde::Serialize;

/// Per-worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub rows: u64,
    pub sent_ok: u64,
    pub send_failed: u64,
    pub rejected: u64,
    pub unparseable_timestamps: u64,
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.rows += other.rows;
        self.sent_ok += other.sent_ok;
        self.send_failed += other.send_failed;
        self.rejected += other.rejected;
        self.unparseable_timestamps += other.unparseable_timestamps;
    }
}

/// Totals of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub workers: usize,
    /// Source records that could not be decoded at all.
    pub malformed: u64,
    #[serde(flatten)]
    pub totals: WorkerStats,
}

impl RunSummary {
    /// Rows that produced an audit record.
    pub fn logged(&self) -> u64 {
        self.totals.sent_ok + self.totals.send_failed
    }

    /// Every validated row went out without a timestamp, which usually means
    /// the source renders `event_timestamp` in a layout the parser rejects.
    pub fn timestamps_all_unparseable(&self) -> bool {
        let validated = self.totals.rows.saturating_sub(self.totals.rejected);
        validated > 0 && self.totals.unparseable_timestamps == validated
    }
}
