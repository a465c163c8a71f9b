//! Local renderer invocation (C8 collaborator, spec.md §6.3/§4.3.2).

mod child_process;
mod mock;

pub use child_process::{ChildProcessRenderer, RendererConfig};
pub use mock::MockRenderer;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{DiagramType, JobId, Quality, Style};

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub request_id: JobId,
    pub source: String,
    pub style: Style,
    pub quality: Quality,
    pub diagram_type: DiagramType,
    pub output_format: String,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    pub raster: Option<Vec<u8>>,
    pub vector_source: Option<String>,
    pub exchange_document: Option<String>,
}

/// All failure modes converge on `RenderFailure`/`Timeout` at the executor
/// (spec.md §7); this enum carries enough detail to classify which.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render timed out")]
    Timeout,

    #[error("renderer exited with status {0}")]
    NonZeroExit(i32),

    #[error("renderer produced no terminating status object")]
    NoStatusObject,

    #[error("renderer output exceeded the bounded buffer")]
    OutputTooLarge,

    #[error("renderer failed: {0}")]
    Failed(String),

    #[error("failed to spawn renderer: {0}")]
    Spawn(String),
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<RenderOutput, RenderError>;
}
