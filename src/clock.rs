//! Monotonic time, wall time and unique job IDs (C1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::domain::JobId;

/// Source of wall-clock timestamps, monotonic instants and job IDs.
///
/// A single process-wide instance is shared (via `Arc`) so that all
/// components observe the same notion of "now" and IDs stay strictly
/// time-ordered (spec.md I6, Job.id).
pub struct Clock {
    start: Instant,
    seq: AtomicU64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn now_mono(&self) -> Instant {
        Instant::now()
    }

    /// A globally unique, monotonically time-ordered ID.
    ///
    /// Layout is a 13-hex-digit wall-clock millisecond prefix (so IDs sort
    /// lexicographically in submission order) followed by a per-process
    /// sequence number that breaks ties within the same millisecond, and a
    /// short random suffix to keep IDs unique across process restarts.
    pub fn next_job_id(&self) -> JobId {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let rand = uuid::Uuid::new_v4().as_u128() as u32;
        JobId(format!("{millis:013x}-{seq:08x}-{rand:08x}"))
    }

    /// Allows tests to assert relative ordering without depending on real
    /// elapsed wall-clock time.
    pub fn since_start(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
