use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{LlmClient, LlmError, LlmRequest, LlmResponse};

/// Test double driven by a scripted sequence of responses, one per call,
/// modeled on the teacher's `MockJobMarketplace` (`job_claim.rs` tests).
pub struct MockLlmClient {
    script: Mutex<Vec<Result<LlmResponse, LlmError>>>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    /// `script` is consumed front-to-back, one entry per `generate` call.
    pub fn new(script: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script),
            delay: None,
        }
    }

    pub fn always_succeeding(text: impl Into<String>, tokens_in: u64, tokens_out: u64) -> Self {
        Self::new(vec![Ok(LlmResponse {
            text: text.into(),
            tokens_in,
            tokens_out,
        })])
    }

    /// Sleeps `delay` before consulting the script, so tests can reliably
    /// observe a job sitting in `InProgress` (e.g. to exercise in-flight
    /// cancellation) before the call resolves.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else if let Some(last) = script.first() {
            last.clone()
        } else {
            Err(LlmError::Rejected("mock script exhausted".to_string()))
        }
    }
}
