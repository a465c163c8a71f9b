//! Queue (C6) and Retry queue (C7), spec.md §4.2.
//!
//! Generalizes `job_processor.rs`'s `PriorityJob` / `BinaryHeap<PriorityJob>`
//! pairing (there, ordered by payment amount) into the strict total order of
//! spec.md I6, plus a parallel delay queue for retries.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::domain::{queue_order, Job, JobId};

/// Wraps `Job` so `BinaryHeap` (a max-heap) pops in spec.md I6 order: the
/// job that `queue_order` says precedes another compares as greater.
struct Ordered(Job);

impl PartialEq for Ordered {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Ordered {}

impl PartialOrd for Ordered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ordered {
    fn cmp(&self, other: &Self) -> Ordering {
        queue_order(&self.0, &other.0).reverse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// C6: bounded priority queue of freshly admitted jobs.
pub struct JobQueue {
    heap: Mutex<BinaryHeap<Ordered>>,
    capacity: usize,
    notify: Notify,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            capacity,
            notify: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, job: Job) -> Result<(), QueueFull> {
        let mut heap = self.heap.lock().unwrap();
        if heap.len() >= self.capacity {
            return Err(QueueFull);
        }
        heap.push(Ordered(job));
        drop(heap);
        self.notify.notify_waiters();
        Ok(())
    }

    fn peek_head(&self) -> Option<Job> {
        self.heap.lock().unwrap().peek().map(|o| o.0.clone())
    }

    fn pop(&self) -> Option<Job> {
        self.heap.lock().unwrap().pop().map(|o| o.0)
    }

    /// Removes a queued job by id (spec.md §4.3 "A cancel on a Queued job
    /// simply removes it from C6/C7"). O(n) — acceptable for a cancel path.
    pub fn remove(&self, id: &JobId) -> bool {
        let mut heap = self.heap.lock().unwrap();
        let items: Vec<Ordered> = std::mem::take(&mut *heap).into_vec();
        let before = items.len();
        let mut rebuilt = BinaryHeap::new();
        for item in items {
            if &item.0.id != id {
                rebuilt.push(item);
            }
        }
        let removed = rebuilt.len() != before;
        *heap = rebuilt;
        removed
    }
}

/// A job awaiting retry, not dispatchable before `visible_at`.
struct RetryEntry {
    job: Job,
    visible_at: Instant,
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.job.id == other.job.id
    }
}
impl Eq for RetryEntry {}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    /// Earliest `visible_at` pops first (this is a max-heap, so reverse the
    /// natural earliest-first ordering); ties fall back to I6 queue order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| queue_order(&self.job, &other.job).reverse())
    }
}

/// C7: unbounded-in-count, per-job-bounded-by-maxAttempts delayed queue.
pub struct RetryQueue {
    heap: Mutex<BinaryHeap<RetryEntry>>,
    notify: Notify,
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn push(&self, job: Job, visible_at: Instant) {
        self.heap.lock().unwrap().push(RetryEntry { job, visible_at });
        self.notify.notify_waiters();
    }

    fn peek_head(&self) -> Option<(Job, Instant)> {
        self.heap
            .lock()
            .unwrap()
            .peek()
            .map(|e| (e.job.clone(), e.visible_at))
    }

    fn pop(&self) -> Option<Job> {
        self.heap.lock().unwrap().pop().map(|e| e.job)
    }

    pub fn remove(&self, id: &JobId) -> bool {
        let mut heap = self.heap.lock().unwrap();
        let items: Vec<RetryEntry> = std::mem::take(&mut *heap).into_vec();
        let before = items.len();
        let mut rebuilt = BinaryHeap::new();
        for item in items {
            if &item.job.id != id {
                rebuilt.push(item);
            }
        }
        let removed = rebuilt.len() != before;
        *heap = rebuilt;
        removed
    }
}

/// Combines C6 and C7 behind the single dispatch rule of spec.md §4.2:
/// "pop earliest-visible from C7 if head.visibleAt <= now, else pop head of
/// C6, else block."
pub struct Queues {
    pub fresh: JobQueue,
    pub retry: RetryQueue,
}

impl Queues {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            fresh: JobQueue::new(max_queue_size),
            retry: RetryQueue::new(),
        }
    }

    /// Blocks until C6 or C7 has a ready item, without removing it. Used by
    /// the executor to evaluate global caps *before* popping (spec.md §4.3
    /// step 2): a blocked evaluator re-checks without losing its place in
    /// line.
    ///
    /// The `notified()` futures are created and `enable()`d before
    /// `has_ready()` runs, so a `push` landing between the check and the
    /// `select!` is still observed instead of leaving the dispatcher parked
    /// on the hour-long fallback sleep.
    pub async fn wait_until_ready(&self) {
        loop {
            let fresh_notified = self.fresh.notify.notified();
            let retry_notified = self.retry.notify.notified();
            tokio::pin!(fresh_notified);
            tokio::pin!(retry_notified);
            fresh_notified.as_mut().enable();
            retry_notified.as_mut().enable();

            if self.has_ready() {
                return;
            }

            let wait = self
                .retry
                .peek_head()
                .map(|(_, visible_at)| visible_at.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_secs(3600));

            tokio::select! {
                _ = fresh_notified => {}
                _ = retry_notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn has_ready(&self) -> bool {
        if let Some((_, visible_at)) = self.retry.peek_head() {
            if visible_at <= Instant::now() {
                return true;
            }
        }
        self.fresh.peek_head().is_some()
    }

    /// Pops the next ready job per the C7-preference rule. Returns `None`
    /// only if nothing was actually ready (a race since `wait_until_ready`
    /// returned) — callers should loop.
    pub fn pop_ready(&self) -> Option<Job> {
        if let Some((_, visible_at)) = self.retry.peek_head() {
            if visible_at <= Instant::now() {
                if let Some(job) = self.retry.pop() {
                    return Some(job);
                }
            }
        }
        self.fresh.pop()
    }

    pub fn remove(&self, id: &JobId) -> bool {
        self.fresh.remove(id) || self.retry.remove(id)
    }
}
