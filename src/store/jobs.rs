//! Job store (C3): durable record of every accepted job (spec.md §6.5).
//!
//! In-memory reference implementation modeled on
//! `results::storage::S5StorageClient`. State transitions on a single job
//! are applied under one lock acquisition so a reader never observes a
//! partially-applied transition (spec.md §5 "Shared-resource policy").

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Job, JobId, JobState};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Indexed by `id` (unique).
    async fn insert(&self, job: Job) -> anyhow::Result<()>;

    /// Atomic replace of the stored job by `id`.
    async fn update(&self, job: Job) -> anyhow::Result<()>;

    async fn get(&self, id: &JobId) -> Option<Job>;

    /// Indexed by `(subject, submittedAt desc)`.
    async fn list_by_subject(&self, subject_key: &str) -> Vec<Job>;

    /// Count of non-terminal jobs for a subject (Queued, Dispatched,
    /// InProgress) — the admission-time concurrency signal (spec.md §4.1
    /// step 2).
    async fn count_non_terminal(&self, subject_key: &str) -> u32;

    /// Count of jobs accepted for a subject with `admittedAt >= since`,
    /// regardless of current state (Queued through terminal). This is the
    /// admission-time request-rate signal (spec.md §4.1, I5: "admission,
    /// not completion, is the point that enforces this") — unlike the
    /// usage ledger, it counts a burst the instant it is accepted, not
    /// once each job eventually settles.
    async fn count_admitted_since(&self, subject_key: &str, since: DateTime<Utc>) -> u32;

    /// Indexed by `(state, priority desc, admittedAt asc)`. Used by
    /// `Broker::restore` to reload every non-terminal job (spec.md §4.4).
    async fn list_non_terminal(&self) -> Vec<Job>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.id) {
            anyhow::bail!("job {} already exists", job.id);
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn update(&self, job: Job) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    async fn list_by_subject(&self, subject_key: &str) -> Vec<Job> {
        let jobs = self.jobs.lock().unwrap();
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| j.subject.key == subject_key)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        out
    }

    async fn count_non_terminal(&self, subject_key: &str) -> u32 {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.subject.key == subject_key && !j.state.is_terminal())
            .count() as u32
    }

    async fn list_non_terminal(&self) -> Vec<Job> {
        let jobs = self.jobs.lock().unwrap();
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| !j.state.is_terminal())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.admitted_at.cmp(&b.admitted_at))
        });
        out
    }

    async fn count_admitted_since(&self, subject_key: &str, since: DateTime<Utc>) -> u32 {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.subject.key == subject_key && j.admitted_at >= since)
            .count() as u32
    }
}
