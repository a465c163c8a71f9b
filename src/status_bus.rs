//! Status bus (C5): topic-per-job publish/subscribe (spec.md §4.5).
//!
//! Generalizes the teacher's `api::websocket::manager::SessionManager`
//! registry pattern from "one entry per session" to "one topic per job,
//! many subscribers per topic". Publishes are non-blocking: a subscriber
//! with a full channel has a non-terminal event dropped rather than
//! stalling the publisher (spec.md §5 "publishes are non-blocking").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::domain::JobId;

/// Bounded per-subscriber channel capacity. Sized generously enough that a
/// normal job's full event sequence (queued, dispatched, in-progress,
/// zero-or-more retries, one terminal event) never overflows it.
const SUBSCRIBER_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Queued,
    Dispatched,
    InProgress,
    Retry,
    Completed,
    Failed,
    Cancelled,
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Completed | EventKind::Failed | EventKind::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub job_id: JobId,
    pub kind: EventKind,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

pub type EventReceiver = mpsc::Receiver<Event>;

#[derive(Default)]
pub struct StatusBus {
    topics: RwLock<HashMap<JobId, Vec<mpsc::Sender<Event>>>>,
}

impl StatusBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new subscriber for `job_id`. Multiple subscribers per job
    /// are permitted; each gets its own copy of every subsequent publish
    /// (spec.md §4.5 "Fan-out").
    pub async fn subscribe(&self, job_id: &JobId) -> EventReceiver {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.topics
            .write()
            .await
            .entry(job_id.clone())
            .or_default()
            .push(tx);
        rx
    }

    /// Publishes an event. A publish to a job with no subscribers is a
    /// no-op (spec.md §4.5). Closed subscriber channels are pruned; a full
    /// channel silently drops the event rather than blocking the publisher.
    pub async fn publish(&self, job_id: &JobId, kind: EventKind, data: Option<serde_json::Value>) {
        let event = Event {
            job_id: job_id.clone(),
            kind: kind.clone(),
            data,
            timestamp: Utc::now(),
        };

        let mut topics = self.topics.write().await;
        let Some(senders) = topics.get_mut(job_id) else {
            return;
        };

        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(job_id = %job_id, "dropping status event, subscriber channel full");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if kind.is_terminal() {
            topics.remove(job_id);
        }
    }

    pub async fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.topics
            .read()
            .await
            .get(job_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
