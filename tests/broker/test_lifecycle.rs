//! End-to-end dispatch scenarios (spec.md §8 S1, S4, S5): happy path,
//! retryable-then-success, and terminal render failure.

use std::sync::Arc;
use std::time::Duration;

use diagram_broker::domain::{JobState, Tier};
use diagram_broker::error::JobErrorKind;
use diagram_broker::llm::{LlmError, LlmResponse};
use diagram_broker::render::{RenderError, RenderOutput, Renderer};

use super::common::{build_stack, mock_llm, sample_spec, subject, wait_terminal, StackOptions};

struct AlwaysOkRenderer;

#[async_trait::async_trait]
impl Renderer for AlwaysOkRenderer {
    async fn render(&self, _request: diagram_broker::render::RenderRequest) -> Result<RenderOutput, RenderError> {
        Ok(RenderOutput {
            raster: Some(vec![1, 2, 3, 4]),
            vector_source: Some("diagram { }".to_string()),
            exchange_document: None,
        })
    }
}

#[tokio::test]
async fn happy_path_completes_with_a_result() {
    let llm = mock_llm(vec![Ok(LlmResponse {
        text: "```text\ndiagram source\n```".to_string(),
        tokens_in: 120,
        tokens_out: 340,
    })]);
    let renderer: Arc<dyn Renderer> = Arc::new(AlwaysOkRenderer);

    let stack = build_stack(llm, renderer, StackOptions::default());
    let who = subject("frank", Tier::T1);

    let outcome = stack
        .broker
        .submit(who.clone(), sample_spec())
        .await
        .expect("submission should be admitted");

    let job = wait_terminal(&stack.broker, &who, &outcome.job_id, Duration::from_secs(2)).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    let result = job.result.expect("completed job carries a result");
    assert_eq!(result.raster, Some(vec![1, 2, 3, 4]));
    assert_eq!(result.tokens_consumed, 460);
}

#[tokio::test]
async fn retryable_upstream_error_then_success_completes() {
    let llm = mock_llm(vec![
        Err(LlmError::Transport("connection reset".to_string())),
        Ok(LlmResponse {
            text: "```text\ndiagram source\n```".to_string(),
            tokens_in: 10,
            tokens_out: 20,
        }),
    ]);
    let renderer: Arc<dyn Renderer> = Arc::new(AlwaysOkRenderer);

    let stack = build_stack(llm, renderer, StackOptions::default());
    let who = subject("grace", Tier::T2);

    let outcome = stack
        .broker
        .submit(who.clone(), sample_spec())
        .await
        .expect("submission should be admitted");

    let job = wait_terminal(&stack.broker, &who, &outcome.job_id, Duration::from_secs(2)).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2, "one failed attempt then one successful attempt");
}

#[tokio::test]
async fn render_failure_is_terminal_without_a_retry() {
    struct AlwaysFailingRenderer;

    #[async_trait::async_trait]
    impl Renderer for AlwaysFailingRenderer {
        async fn render(&self, _request: diagram_broker::render::RenderRequest) -> Result<RenderOutput, RenderError> {
            Err(RenderError::Failed("unsupported diagram syntax".to_string()))
        }
    }

    let llm = mock_llm(vec![Ok(LlmResponse {
        text: "```text\nmalformed\n```".to_string(),
        tokens_in: 5,
        tokens_out: 5,
    })]);
    let renderer: Arc<dyn Renderer> = Arc::new(AlwaysFailingRenderer);

    let stack = build_stack(llm, renderer, StackOptions::default());
    let who = subject("heidi", Tier::T0);

    let outcome = stack
        .broker
        .submit(who.clone(), sample_spec())
        .await
        .expect("submission should be admitted");

    let job = wait_terminal(&stack.broker, &who, &outcome.job_id, Duration::from_secs(2)).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1, "render failures never retry");
    let error = job.error.expect("failed job carries an error");
    assert_eq!(error.kind, JobErrorKind::RenderFailure);
}

#[tokio::test]
async fn permanent_upstream_error_fails_without_a_retry() {
    let llm = mock_llm(vec![Err(LlmError::Rejected("prompt violates content policy".to_string()))]);
    let renderer: Arc<dyn Renderer> = Arc::new(AlwaysOkRenderer);

    let stack = build_stack(llm, renderer, StackOptions::default());
    let who = subject("ivan", Tier::T3);

    let outcome = stack
        .broker
        .submit(who.clone(), sample_spec())
        .await
        .expect("submission should be admitted");

    let job = wait_terminal(&stack.broker, &who, &outcome.job_id, Duration::from_secs(2)).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error.unwrap().kind, JobErrorKind::UpstreamPermanent);
}
