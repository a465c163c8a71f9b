//! Error taxonomy (spec.md §7).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quota::AdmissionError;

/// Terminal-job error classification. Spec-level kinds, not wire-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobErrorKind {
    UpstreamTransient,
    UpstreamPermanent,
    RenderFailure,
    Timeout,
    StalenessExpired,
    Cancelled,
    Internal,
}

impl JobErrorKind {
    /// Whether the executor should schedule another attempt for this kind,
    /// subject to `attempts < maxAttempts` (spec.md §4.3 step 8).
    pub fn is_retryable(self) -> bool {
        matches!(self, JobErrorKind::UpstreamTransient)
    }
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobErrorKind::UpstreamTransient => "upstream_transient",
            JobErrorKind::UpstreamPermanent => "upstream_permanent",
            JobErrorKind::RenderFailure => "render_failure",
            JobErrorKind::Timeout => "timeout",
            JobErrorKind::StalenessExpired => "staleness_expired",
            JobErrorKind::Cancelled => "cancelled",
            JobErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Errors surfaced synchronously to a caller of `Broker`'s public operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("admission denied: {0}")]
    AdmissionDenied(#[from] AdmissionError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job not found")]
    NotFound,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl BrokerError {
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::AdmissionDenied(e) => e.status_code(),
            BrokerError::InvalidRequest(_) => 400,
            BrokerError::NotFound => 404,
            BrokerError::Store(_) => 500,
        }
    }

    /// Machine-readable code for the §4.4 submit contract ("every
    /// C4.Reject reason is surfaced with a machine-readable code").
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::AdmissionDenied(e) => e.reason.code(),
            BrokerError::InvalidRequest(_) => "invalid_request",
            BrokerError::NotFound => "not_found",
            BrokerError::Store(_) => "internal_error",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BrokerError::AdmissionDenied(e) => e.retry_after,
            _ => None,
        }
    }
}
