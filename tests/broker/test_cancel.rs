//! Cancellation scenarios (spec.md §8 S6, P8 cancel idempotence).

use std::sync::Arc;
use std::time::Duration;

use diagram_broker::domain::{JobState, Tier};
use diagram_broker::llm::MockLlmClient;
use diagram_broker::render::MockRenderer;

use super::common::{build_stack, sample_spec, subject, wait_terminal, StackOptions};

#[tokio::test]
async fn cancelling_a_queued_job_is_immediate_and_idempotent() {
    let llm = Arc::new(MockLlmClient::always_succeeding("```text\nok\n```", 1, 1));
    let renderer = Arc::new(MockRenderer::always_succeeding(Default::default()));

    // No dispatcher: the job sits in C6 until we act on it.
    let stack = build_stack(llm, renderer, StackOptions { spawn_dispatcher: false, ..Default::default() });
    let who = subject("judy", Tier::T1);

    let outcome = stack
        .broker
        .submit(who.clone(), sample_spec())
        .await
        .expect("submission should be admitted");

    let cancelled = stack
        .broker
        .cancel(&who, &outcome.job_id)
        .await
        .expect("cancel should not error");
    assert!(cancelled, "first cancel of a queued job must succeed");

    let job = stack.broker.query(&who, &outcome.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);

    let second = stack
        .broker
        .cancel(&who, &outcome.job_id)
        .await
        .expect("cancel should not error");
    assert!(!second, "a terminal job has nothing left to cancel");
}

#[tokio::test]
async fn cancelling_another_subjects_job_does_nothing() {
    let llm = Arc::new(MockLlmClient::always_succeeding("```text\nok\n```", 1, 1));
    let renderer = Arc::new(MockRenderer::always_succeeding(Default::default()));

    let stack = build_stack(llm, renderer, StackOptions { spawn_dispatcher: false, ..Default::default() });
    let owner = subject("kim", Tier::T1);
    let intruder = subject("lee", Tier::T1);

    let outcome = stack.broker.submit(owner.clone(), sample_spec()).await.unwrap();

    let cancelled = stack.broker.cancel(&intruder, &outcome.job_id).await.unwrap();
    assert!(!cancelled, "a subject may only cancel its own jobs");

    let job = stack.broker.query(&owner, &outcome.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Queued);
}

#[tokio::test]
async fn cancelling_an_in_flight_job_stops_it_before_completion() {
    let llm = Arc::new(
        MockLlmClient::always_succeeding("```text\nok\n```", 1, 1).with_delay(Duration::from_millis(300)),
    );
    let renderer = Arc::new(MockRenderer::always_succeeding(Default::default()));

    let stack = build_stack(llm, renderer, StackOptions::default());
    let who = subject("morgan", Tier::T1);

    let outcome = stack.broker.submit(who.clone(), sample_spec()).await.unwrap();

    // Give the dispatcher time to pop the job and reach the LLM call.
    tokio::time::sleep(Duration::from_millis(60)).await;

    let cancelled = stack
        .broker
        .cancel(&who, &outcome.job_id)
        .await
        .expect("cancel should not error");
    assert!(cancelled, "an in-flight job must be cancellable");

    let job = wait_terminal(&stack.broker, &who, &outcome.job_id, Duration::from_secs(2)).await;
    assert_eq!(job.state, JobState::Cancelled);
}
