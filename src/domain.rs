//! Core data model shared by every component (spec.md §3).

use std::cmp::Ordering as CmpOrdering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobErrorKind;

/// Opaque, globally unique, monotonically time-ordered job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service tier, lowest to highest. Ordering determines dispatch priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    T0,
    T1,
    T2,
    T3,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::T0, Tier::T1, Tier::T2, Tier::T3];
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::T0 => "T0",
            Tier::T1 => "T1",
            Tier::T2 => "T2",
            Tier::T3 => "T3",
        };
        write!(f, "{s}")
    }
}

/// A principal identity derived from a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub key: String,
    pub tier: Tier,
}

impl Subject {
    pub fn new(key: impl Into<String>, tier: Tier) -> Self {
        Self { key: key.into(), tier }
    }
}

/// Icon family requested for the diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Azure,
    Aws,
    Gcp,
    K8s,
    Generic,
}

impl Default for Style {
    fn default() -> Self {
        Style::Azure
    }
}

/// Requested target complexity, roughly mapping to node count (spec.md §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Simple,
    Standard,
    Enterprise,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Standard
    }
}

/// Which output the renderer should emphasize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagramType {
    Raster,
    ExchangeDocument,
}

impl Default for DiagramType {
    fn default() -> Self {
        DiagramType::Raster
    }
}

/// The opaque request payload (spec.md §6.1). Unknown fields are ignored by
/// the deserializer at the HTTP boundary, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub prompt: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub diagram_type: DiagramType,
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

fn default_output_format() -> String {
    "png".to_string()
}

impl JobSpec {
    pub const MAX_PROMPT_BYTES: usize = 8 * 1024;

    /// Validates the §6.1 schema: `prompt` is required unless `templateId`
    /// is present, and `prompt` is bounded to 8 KiB.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.prompt, &self.template_id) {
            (None, None) => {
                return Err("either `prompt` or `templateId` is required".to_string())
            }
            (Some(p), _) if p.len() > Self::MAX_PROMPT_BYTES => {
                return Err(format!(
                    "prompt exceeds {} bytes",
                    Self::MAX_PROMPT_BYTES
                ))
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Dispatched,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// The artifact bundle produced by a successful job (spec.md §3 Job.result).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    pub raster: Option<Vec<u8>>,
    pub source: Option<String>,
    pub exchange_document: Option<String>,
    pub tokens_consumed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

/// The unit of work (spec.md §3 Job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub subject: Subject,
    pub tier: Tier,
    pub submitted_at: DateTime<Utc>,
    pub admitted_at: DateTime<Utc>,
    pub spec: JobSpec,
    pub state: JobState,
    pub attempts: u32,
    pub priority: u8,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
}

/// An immutable append-only usage ledger entry (spec.md §3 Usage record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub subject: Subject,
    pub timestamp: DateTime<Utc>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub success: bool,
    pub error_kind: Option<JobErrorKind>,
    pub estimated_cost: f64,
}

/// Strict total order for the queue (spec.md I6): higher priority first,
/// then earlier `admitted_at`, then `id` to break remaining ties.
pub fn queue_order(a: &Job, b: &Job) -> CmpOrdering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.admitted_at.cmp(&b.admitted_at))
        .then_with(|| a.id.cmp(&b.id))
}
