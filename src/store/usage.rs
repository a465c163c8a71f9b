//! Usage store (C2): append-only ledger of per-job usage records.
//!
//! Modeled on `results::storage::S5StorageClient` in the teacher: a narrow
//! trait in front of an `Arc<Mutex<HashMap<..>>>` in-memory implementation,
//! standing in for a real backing store (spec.md §6.5 "exact schema is
//! implementation-defined").

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Subject, UsageRecord};

/// (subject, timestamp desc) and (timestamp desc) indexes are required by
/// spec.md §6.5; `window_aggregate` is the only read pattern C4 needs and is
/// expressed directly rather than as a generic query API.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn append(&self, record: UsageRecord) -> anyhow::Result<()>;

    /// Returns `(requests_in_hour, requests_in_day, tokens_in_day)` for the
    /// given subject, counting only records with `timestamp >= day_start`
    /// (hour count additionally requires `timestamp >= hour_start`).
    async fn window_aggregate(
        &self,
        subject: &Subject,
        hour_start: DateTime<Utc>,
        day_start: DateTime<Utc>,
    ) -> (u32, u32, u64);

    async fn records_for(&self, subject: &Subject) -> Vec<UsageRecord>;
}

#[derive(Default)]
pub struct InMemoryUsageStore {
    by_subject: Mutex<HashMap<String, Vec<UsageRecord>>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn append(&self, record: UsageRecord) -> anyhow::Result<()> {
        let mut by_subject = self.by_subject.lock().unwrap();
        by_subject
            .entry(record.subject.key.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn window_aggregate(
        &self,
        subject: &Subject,
        hour_start: DateTime<Utc>,
        day_start: DateTime<Utc>,
    ) -> (u32, u32, u64) {
        let by_subject = self.by_subject.lock().unwrap();
        let Some(records) = by_subject.get(&subject.key) else {
            return (0, 0, 0);
        };

        let mut requests_hour = 0u32;
        let mut requests_day = 0u32;
        let mut tokens_day = 0u64;

        for r in records {
            if r.timestamp >= day_start {
                requests_day += 1;
                tokens_day += r.tokens_in + r.tokens_out;
                if r.timestamp >= hour_start {
                    requests_hour += 1;
                }
            }
        }

        (requests_hour, requests_day, tokens_day)
    }

    async fn records_for(&self, subject: &Subject) -> Vec<UsageRecord> {
        self.by_subject
            .lock()
            .unwrap()
            .get(&subject.key)
            .cloned()
            .unwrap_or_default()
    }
}
