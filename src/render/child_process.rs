use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{RenderError, RenderOutput, RenderRequest, Renderer};

/// Bounded output buffer per spec.md §4.3.2.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Path to the sandboxed renderer executable.
    pub binary: String,
    /// Hard wall-clock budget for a single render attempt (default 120s).
    pub timeout: Duration,
    /// Credential for any upstream service the child needs (spec.md §6.3
    /// "sufficient to locate the LLM credential").
    pub upstream_credential_env: Option<(String, String)>,
    pub path_env: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            binary: "diagram-renderer".to_string(),
            timeout: Duration::from_secs(120),
            upstream_credential_env: None,
            path_env: "/usr/bin:/bin".to_string(),
        }
    }
}

/// Spawns the renderer as a sandboxed child process, one job at a time
/// (exclusivity is enforced by the executor, not here). Modeled on the
/// per-job working directory / bounded environment pattern used for
/// container task execution in the broader corpus (e.g. the LSF+Apptainer
/// backend's isolated `attempt_dir` per task).
pub struct ChildProcessRenderer {
    config: RendererConfig,
}

impl ChildProcessRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }
}

/// The child's single self-describing status object (spec.md §4.3.2
/// "writes exactly one self-describing status object to its standard
/// output stream on exit").
#[derive(Debug, Deserialize)]
struct ChildStatus {
    status: ChildStatusKind,
    raster_base64: Option<String>,
    vector_source: Option<String>,
    exchange_document: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ChildStatusKind {
    Ok,
    Error,
}

#[derive(Serialize)]
struct ChildInput<'a> {
    request_id: &'a str,
    prompt_source: &'a str,
    style: &'a str,
    quality: &'a str,
    diagram_type: &'a str,
    output_format: &'a str,
}

#[async_trait]
impl Renderer for ChildProcessRenderer {
    async fn render(&self, request: RenderRequest) -> Result<RenderOutput, RenderError> {
        let work_dir = tempfile::tempdir()
            .map_err(|e| RenderError::Spawn(format!("failed to create working dir: {e}")))?;

        let style = format!("{:?}", request.style).to_lowercase();
        let quality = format!("{:?}", request.quality).to_lowercase();
        let diagram_type = format!("{:?}", request.diagram_type).to_lowercase();

        let input = ChildInput {
            request_id: &request.request_id.0,
            prompt_source: &request.source,
            style: &style,
            quality: &quality,
            diagram_type: &diagram_type,
            output_format: &request.output_format,
        };
        let input_json = serde_json::to_vec(&input)
            .map_err(|e| RenderError::Spawn(format!("failed to encode renderer input: {e}")))?;

        let mut command = Command::new(&self.config.binary);
        command
            .current_dir(work_dir.path())
            .env_clear()
            .env("PATH", &self.config.path_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some((key, value)) = &self.config.upstream_credential_env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| RenderError::Spawn(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&input_json).await;
        }

        let run = async {
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| RenderError::Spawn(e.to_string()))?;

            if output.stdout.len() > MAX_OUTPUT_BYTES {
                return Err(RenderError::OutputTooLarge);
            }

            if !output.status.success() {
                let code = output.status.code().unwrap_or(-1);
                warn!(
                    code,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "renderer exited non-zero"
                );
                return Err(RenderError::NonZeroExit(code));
            }

            let status: ChildStatus = serde_json::from_slice(&output.stdout)
                .map_err(|_| RenderError::NoStatusObject)?;

            match status.status {
                ChildStatusKind::Error => Err(RenderError::Failed(
                    status.message.unwrap_or_else(|| "renderer reported failure".to_string()),
                )),
                ChildStatusKind::Ok => {
                    let raster = status
                        .raster_base64
                        .map(|b64| base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64))
                        .transpose()
                        .map_err(|e| RenderError::Failed(format!("invalid raster encoding: {e}")))?;

                    debug!(request_id = %request.request_id, "render succeeded");
                    Ok(RenderOutput {
                        raster,
                        vector_source: status.vector_source,
                        exchange_document: status.exchange_document,
                    })
                }
            }
        };

        match tokio::time::timeout(self.config.timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout),
        }
    }
}
