use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{info, warn};

use super::types::{DiagramRenderer, RenderArtifact, RenderError, RenderRequest};

const PUPPETEER_CONFIG_FILE: &str = "puppeteer-config.json";
const PUPPETEER_CONFIG: &str = r#"{ "args": ["--no-sandbox", "--disable-setuid-sandbox"] }"#;

/// Settings slice consumed by the CLI strategy.
#[derive(Debug, Clone)]
pub struct MermaidCliSettings {
    pub cli_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub theme: String,
    pub width: u32,
    pub height: u32,
    pub timeout: Duration,
}

/// Renders diagrams by shelling out to `mmdc`, the Mermaid CLI.
///
/// Each request writes its source to a uniquely-named temp file in the
/// scratch directory, points the CLI at it, reads the output file back, and
/// removes both files whatever the outcome. Unique names come from the
/// `tempfile` builders, so concurrent requests never collide.
#[derive(Debug, Clone)]
pub struct MermaidCliRenderer {
    settings: MermaidCliSettings,
    puppeteer_config: PathBuf,
}

impl MermaidCliRenderer {
    /// Prepare the scratch directory and persist the sandbox-disabling
    /// puppeteer configuration the CLI is pointed at on every invocation.
    pub fn new(settings: MermaidCliSettings) -> Result<Self, RenderError> {
        fs::create_dir_all(&settings.scratch_dir)?;
        let puppeteer_config = settings.scratch_dir.join(PUPPETEER_CONFIG_FILE);
        fs::write(&puppeteer_config, PUPPETEER_CONFIG)?;
        Ok(Self {
            settings,
            puppeteer_config,
        })
    }

    async fn run_cli(&self, input_path: &Path, output_path: &Path) -> Result<(), RenderError> {
        let cli_started_at = Instant::now();

        let mut command = Command::new(&self.settings.cli_path);
        command
            .arg("--input")
            .arg(input_path)
            .arg("--output")
            .arg(output_path)
            .arg("--theme")
            .arg(&self.settings.theme)
            .arg("--width")
            .arg(self.settings.width.to_string())
            .arg("--height")
            .arg(self.settings.height.to_string())
            .arg("--puppeteerConfigFile")
            .arg(&self.puppeteer_config)
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.settings.timeout, command.output()).await {
            Ok(result) => result.map_err(|err| {
                warn!(
                    target = "tratto::render::cli",
                    cli_path = %self.settings.cli_path.display(),
                    error = %err,
                    "failed to spawn Mermaid CLI"
                );
                if err.kind() == ErrorKind::NotFound {
                    RenderError::Spawn(err)
                } else {
                    RenderError::Io(err)
                }
            })?,
            Err(_) => {
                warn!(
                    target = "tratto::render::cli",
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "Mermaid CLI did not exit within the deadline; killing it"
                );
                return Err(RenderError::Timeout(self.settings.timeout));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            let exit_code = output.status.code();
            warn!(
                target = "tratto::render::cli",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                cli_elapsed_ms = cli_started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "Mermaid CLI invocation failed"
            );
            return Err(RenderError::Diagram {
                exit_code,
                detail: stderr,
            });
        }

        // A zero exit with stderr content is advisory output, not a failure.
        if !stderr.trim().is_empty() {
            warn!(
                target = "tratto::render::cli",
                stderr = %stderr,
                "Mermaid CLI completed with warnings"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl DiagramRenderer for MermaidCliRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderArtifact, RenderError> {
        let started_at = Instant::now();

        let input_file = tempfile::Builder::new()
            .prefix("diagram-")
            .suffix(".mmd")
            .tempfile_in(&self.settings.scratch_dir)?;
        tokio::fs::write(input_file.path(), request.source.as_bytes()).await?;

        let output_file = tempfile::Builder::new()
            .prefix("diagram-")
            .suffix(".png")
            .tempfile_in(&self.settings.scratch_dir)?;

        let result = match self.run_cli(input_file.path(), output_file.path()).await {
            Ok(()) => tokio::fs::read(output_file.path())
                .await
                .map(|bytes| RenderArtifact {
                    bytes: Bytes::from(bytes),
                    mime_type: "image/png",
                })
                .map_err(RenderError::from),
            Err(err) => Err(err),
        };

        close_scratch_file(input_file, "input");
        close_scratch_file(output_file, "output");

        if let Ok(artifact) = &result {
            info!(
                target = "tratto::render::cli",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                image_bytes = artifact.bytes.len(),
                "diagram rendered via Mermaid CLI"
            );
        }

        result
    }
}

/// Remove a scratch file once the render outcome is settled. Deletion
/// failures are logged and never surface over the primary result.
fn close_scratch_file(file: NamedTempFile, role: &'static str) {
    let path = file.path().to_path_buf();
    if let Err(err) = file.close() {
        warn!(
            target = "tratto::render::cli",
            role,
            path = %path.display(),
            error = %err,
            "failed to remove scratch file"
        );
    }
}
