//! Route handlers for the thin HTTP/SSE surface (spec.md §9, §6.4).
//!
//! Modeled on the teacher's `api::handlers` request/response struct shapes,
//! generalized from inference requests to diagram jobs.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::api::auth::AuthenticatedSubject;
use crate::api::server::AppState;
use crate::domain::{DiagramType, JobId, JobSpec, JobState, Quality, Style};
use crate::error::BrokerError;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub prompt: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub diagram_type: DiagramType,
    pub output_format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub position: usize,
    pub estimated_wait_secs: u64,
}

pub async fn submit(
    State(state): State<AppState>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, BrokerError> {
    let mut spec = JobSpec {
        prompt: request.prompt,
        template_id: request.template_id,
        style: request.style,
        quality: request.quality,
        diagram_type: request.diagram_type,
        output_format: request.output_format.unwrap_or_else(|| "png".to_string()),
    };
    if spec.output_format.is_empty() {
        spec.output_format = "png".to_string();
    }

    let outcome = state.broker.submit(subject, spec).await?;

    Ok(Json(SubmitResponse {
        job_id: outcome.job_id.0,
        position: outcome.position,
        estimated_wait_secs: outcome.estimated_wait.as_secs(),
    }))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn cancel(
    State(state): State<AppState>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, BrokerError> {
    let cancelled = state.broker.cancel(&subject, &JobId(job_id)).await?;
    Ok(Json(CancelResponse { cancelled }))
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub state: JobState,
    pub attempts: u32,
    pub result: Option<crate::domain::JobResult>,
    pub error: Option<crate::domain::JobError>,
}

pub async fn query(
    State(state): State<AppState>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, BrokerError> {
    let job = state.broker.query(&subject, &JobId(job_id)).await?;
    Ok(Json(JobView {
        job_id: job.id.0,
        state: job.state,
        attempts: job.attempts,
        result: job.result,
        error: job.error,
    }))
}

/// SSE adapter over the status bus (spec.md §6.4: message boundaries per
/// event plus an initial "subscribed" acknowledgement).
pub async fn events(
    State(state): State<AppState>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, BrokerError> {
    let job_id = JobId(job_id);
    // Query first so a subject mismatch or unknown job surfaces as an error
    // rather than an endless empty stream.
    state.broker.query(&subject, &job_id).await?;

    let rx = state.broker.subscribe(&job_id).await;
    let subscribed = stream::once(async { Ok(SseEvent::default().event("subscribed").data("ok")) });
    let events = tokio_stream::wrappers::ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_name(&event.kind)).data(data))
    });

    Ok(Sse::new(subscribed.chain(events)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn event_name(kind: &crate::status_bus::EventKind) -> &'static str {
    use crate::status_bus::EventKind::*;
    match kind {
        Queued => "queued",
        Dispatched => "dispatched",
        InProgress => "in-progress",
        Retry => "retry",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: crate::version::VERSION,
    })
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.gather_text() {
        Ok(text) => (axum::http::StatusCode::OK, text),
        Err(e) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
