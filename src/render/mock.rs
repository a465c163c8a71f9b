use std::sync::Mutex;

use async_trait::async_trait;

use super::{RenderError, RenderOutput, RenderRequest, Renderer};

#[derive(Debug)]
enum Scripted {
    Ok(RenderOutput),
    Err(fn() -> RenderError),
}

/// Test double for `Renderer`, driven by a scripted sequence of outcomes.
pub struct MockRenderer {
    script: Mutex<Vec<Scripted>>,
}

impl MockRenderer {
    pub fn always_succeeding(output: RenderOutput) -> Self {
        Self {
            script: Mutex::new(vec![Scripted::Ok(output)]),
        }
    }

    pub fn failing_with(error: fn() -> RenderError) -> Self {
        Self {
            script: Mutex::new(vec![Scripted::Err(error)]),
        }
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn render(&self, _request: RenderRequest) -> Result<RenderOutput, RenderError> {
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.remove(0)
        } else {
            match script.first() {
                Some(Scripted::Ok(out)) => Scripted::Ok(out.clone()),
                Some(Scripted::Err(f)) => Scripted::Err(*f),
                None => return Err(RenderError::Failed("mock script exhausted".to_string())),
            }
        };

        match next {
            Scripted::Ok(out) => Ok(out),
            Scripted::Err(f) => Err(f()),
        }
    }
}
