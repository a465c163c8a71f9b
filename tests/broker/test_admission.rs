//! Admission-time properties (spec.md §8 P-series): concurrency cap,
//! hourly cap, queue-full rejection. The dispatcher is never spawned in
//! these tests so jobs stay exactly where admission left them.

use std::sync::Arc;

use chrono::Utc;
use diagram_broker::domain::{Job, JobId, JobState, Tier};
use diagram_broker::error::BrokerError;
use diagram_broker::llm::MockLlmClient;
use diagram_broker::quota::AdmissionReason;
use diagram_broker::render::MockRenderer;
use diagram_broker::store::JobStore;

use super::common::{build_stack, generous_tiers, sample_spec, subject, StackOptions};

fn stub_doubles() -> (Arc<MockLlmClient>, Arc<MockRenderer>) {
    (
        Arc::new(MockLlmClient::always_succeeding("```text\nok\n```", 1, 1)),
        Arc::new(MockRenderer::always_succeeding(Default::default())),
    )
}

#[tokio::test]
async fn rejects_once_subject_concurrency_cap_is_reached() {
    let (llm, renderer) = stub_doubles();
    let mut tiers = generous_tiers();
    tiers.get_mut(&Tier::T0).unwrap().max_concurrent = 1;

    let stack = build_stack(
        llm,
        renderer,
        StackOptions {
            tiers,
            spawn_dispatcher: false,
            ..Default::default()
        },
    );

    let who = subject("alice", Tier::T0);
    stack
        .broker
        .submit(who.clone(), sample_spec())
        .await
        .expect("first submission should be admitted");

    let err = stack
        .broker
        .submit(who, sample_spec())
        .await
        .expect_err("second concurrent submission should be rejected");

    match err {
        BrokerError::AdmissionDenied(e) => {
            assert_eq!(e.reason, AdmissionReason::SubjectConcurrencyExceeded);
        }
        other => panic!("expected AdmissionDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn rejects_once_subject_hourly_cap_is_reached() {
    let (llm, renderer) = stub_doubles();
    let mut tiers = generous_tiers();
    tiers.get_mut(&Tier::T0).unwrap().requests_per_hour = 1;
    // Avoid tripping the concurrency gate with the seeded history below.
    tiers.get_mut(&Tier::T0).unwrap().max_concurrent = 100;

    let stack = build_stack(
        llm,
        renderer,
        StackOptions {
            tiers,
            spawn_dispatcher: false,
            ..Default::default()
        },
    );

    let who = subject("bob", Tier::T0);

    // Seed one job accepted earlier in the current hour. Admission counts
    // every accepted submission in the window, not just settled ones, so
    // this alone must be enough to trip the hourly cap.
    let now = Utc::now();
    stack
        .job_store
        .insert(Job {
            id: JobId("prior-admitted-job".to_string()),
            subject: who.clone(),
            tier: who.tier,
            submitted_at: now,
            admitted_at: now,
            spec: sample_spec(),
            state: JobState::Completed,
            attempts: 1,
            priority: 0,
            result: None,
            error: None,
        })
        .await
        .unwrap();

    let err = stack
        .broker
        .submit(who, sample_spec())
        .await
        .expect_err("hourly-exhausted subject should be rejected");

    match err {
        BrokerError::AdmissionDenied(e) => {
            assert_eq!(e.reason, AdmissionReason::SubjectHourlyExhausted);
            assert!(e.retry_after.is_some());
        }
        other => panic!("expected AdmissionDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn rejects_when_queue_is_full() {
    let (llm, renderer) = stub_doubles();

    let stack = build_stack(
        llm,
        renderer,
        StackOptions {
            max_queue_size: 1,
            spawn_dispatcher: false,
            ..Default::default()
        },
    );

    stack
        .broker
        .submit(subject("carol", Tier::T1), sample_spec())
        .await
        .expect("first submission fits the single queue slot");

    let err = stack
        .broker
        .submit(subject("dave", Tier::T1), sample_spec())
        .await
        .expect_err("second submission should find the queue full");

    match err {
        BrokerError::AdmissionDenied(e) => assert_eq!(e.reason, AdmissionReason::QueueFull),
        other => panic!("expected AdmissionDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn rejects_invalid_spec_before_touching_quota() {
    let (llm, renderer) = stub_doubles();
    let stack = build_stack(llm, renderer, StackOptions { spawn_dispatcher: false, ..Default::default() });

    let mut spec = sample_spec();
    spec.prompt = None;
    spec.template_id = None;

    let err = stack
        .broker
        .submit(subject("erin", Tier::T2), spec)
        .await
        .expect_err("a spec with neither prompt nor templateId must fail validation");

    assert!(matches!(err, BrokerError::InvalidRequest(_)));
}
