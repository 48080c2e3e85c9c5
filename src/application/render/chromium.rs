use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        dom::Rgba, emulation::SetDefaultBackgroundColorOverrideParams,
        page::CaptureScreenshotFormat,
    },
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::types::{DiagramRenderer, ImageFormat, RenderArtifact, RenderError, RenderRequest};

const DIAGRAM_SELECTOR: &str = "#diagram";
const POLL_INITIAL_INTERVAL: Duration = Duration::from_millis(25);
const POLL_MAX_INTERVAL: Duration = Duration::from_millis(400);

/// Completion probe evaluated in the page. Mermaid replaces the container's
/// text with an `svg` element once it has finished; a rejected diagram lands
/// in `window.__mermaidError` via the harness script.
const POLL_SCRIPT: &str = r##"(() => {
  if (window.__mermaidError) {
    return "error:" + window.__mermaidError;
  }
  return document.querySelector("#diagram svg") ? "done" : "pending";
})()"##;

/// Settings slice consumed by the Chromium strategy.
#[derive(Debug, Clone)]
pub struct ChromiumSettings {
    pub chrome_path: Option<PathBuf>,
    pub mermaid_js_url: String,
    pub theme: String,
    pub format: ImageFormat,
    pub transparent_background: bool,
    pub width: u32,
    pub height: u32,
    pub timeout: Duration,
}

/// Renders diagrams inside a headless Chromium instance driven over CDP.
///
/// Every request launches its own isolated browser, injects a minimal HTML
/// harness embedding the diagram source and the Mermaid bundle, polls for the
/// completion marker, screenshots the rendered element, and tears the browser
/// down on every exit path.
pub struct ChromiumRenderer {
    settings: ChromiumSettings,
}

impl ChromiumRenderer {
    pub fn new(settings: ChromiumSettings) -> Self {
        Self { settings }
    }

    async fn capture(
        &self,
        browser: &Browser,
        request: &RenderRequest,
    ) -> Result<RenderArtifact, RenderError> {
        let page = browser.new_page("about:blank").await?;
        page.set_content(harness_document(&request.source, &self.settings))
            .await?;

        if self.settings.transparent_background && self.settings.format == ImageFormat::Png {
            page.execute(SetDefaultBackgroundColorOverrideParams {
                color: Some(Rgba {
                    r: 0,
                    g: 0,
                    b: 0,
                    a: Some(0.0),
                }),
            })
            .await?;
        }

        self.await_completion(&page).await?;

        let element = page
            .find_element(DIAGRAM_SELECTOR)
            .await
            .map_err(|_| RenderError::ElementNotFound)?;
        let bytes = element.screenshot(screenshot_format(self.settings.format)).await?;

        Ok(RenderArtifact {
            bytes: Bytes::from(bytes),
            mime_type: self.settings.format.mime_type(),
        })
    }

    /// Poll the page until Mermaid has produced an `svg` child or reported a
    /// failure, backing off exponentially up to the configured deadline.
    async fn await_completion(&self, page: &Page) -> Result<(), RenderError> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut interval = POLL_INITIAL_INTERVAL;
        loop {
            let state: String = page
                .evaluate(POLL_SCRIPT)
                .await?
                .into_value()
                .map_err(|e| RenderError::Browser(e.into()))?;
            match state.as_str() {
                "done" => return Ok(()),
                "pending" => {}
                other => {
                    let detail = other.strip_prefix("error:").unwrap_or(other).to_string();
                    return Err(RenderError::Diagram {
                        exit_code: None,
                        detail,
                    });
                }
            }
            if Instant::now() >= deadline {
                return Err(RenderError::Timeout(self.settings.timeout));
            }
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(POLL_MAX_INTERVAL);
        }
    }
}

#[async_trait]
impl DiagramRenderer for ChromiumRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderArtifact, RenderError> {
        let started_at = Instant::now();
        let session = BrowserSession::launch(&self.settings).await?;
        let result = self.capture(&session.browser, request).await;
        session.shutdown().await;

        match &result {
            Ok(artifact) => info!(
                target = "tratto::render::chromium",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                image_bytes = artifact.bytes.len(),
                format = self.settings.format.as_str(),
                "diagram rendered via headless Chromium"
            ),
            Err(err) => warn!(
                target = "tratto::render::chromium",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "diagram render failed"
            ),
        }

        result
    }
}

/// One launched browser bound to one render request.
///
/// `shutdown` runs on success and failure alike; if the render future is
/// dropped at the handler's deadline instead, dropping the [`Browser`] kills
/// the child process and the event-loop task ends with the connection.
struct BrowserSession {
    browser: Browser,
    event_loop: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(settings: &ChromiumSettings) -> Result<Self, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .window_size(settings.width, settings.height);
        if let Some(path) = settings.chrome_path.as_ref() {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(RenderError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| RenderError::Launch(err.to_string()))?;
        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            event_loop,
        })
    }

    /// Close the browser and reap the child process. Close failures are
    /// logged and never mask the render outcome.
    async fn shutdown(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!(
                target = "tratto::render::chromium",
                error = %err,
                "failed to close browser cleanly"
            );
        }
        let _ = self.browser.wait().await;
        self.event_loop.abort();
    }
}

fn screenshot_format(format: ImageFormat) -> CaptureScreenshotFormat {
    match format {
        ImageFormat::Png => CaptureScreenshotFormat::Png,
        ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        ImageFormat::Webp => CaptureScreenshotFormat::Webp,
    }
}

/// Minimal document the browser renders: the escaped source inside the
/// container element, the Mermaid bundle, and an initialization script that
/// records any thrown error for the completion probe.
fn harness_document(source: &str, settings: &ChromiumSettings) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>body {{ margin: 0; padding: 16px; background: transparent; }}</style>
<script src="{js_url}"></script>
</head>
<body>
<pre id="diagram" class="mermaid">{source}</pre>
<script>
window.__mermaidError = null;
if (typeof mermaid === "undefined") {{
  window.__mermaidError = "mermaid library failed to load";
}} else {{
  mermaid.initialize({{ startOnLoad: false, securityLevel: "strict", theme: "{theme}" }});
  mermaid
    .run({{ nodes: [document.getElementById("diagram")] }})
    .catch(function (err) {{ window.__mermaidError = String((err && err.message) || err); }});
}}
</script>
</body>
</html>"#,
        js_url = settings.mermaid_js_url,
        theme = settings.theme,
        source = escape_text(source),
    )
}

/// Text-node escaping for the embedded source; `textContent` undoes it, so
/// Mermaid still sees the exact diagram text.
fn escape_text(source: &str) -> String {
    source.replace('&', "&amp;").replace('<', "&lt;")
}
