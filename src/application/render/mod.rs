//! Diagram rendering strategies behind a single trait seam.
//!
//! Both strategies implement [`DiagramRenderer`] and are selected by
//! configuration; the HTTP layer never knows which one is wired in.

mod chromium;
mod cli;
mod types;

pub use chromium::{ChromiumRenderer, ChromiumSettings};
pub use cli::{MermaidCliRenderer, MermaidCliSettings};
pub use types::{DiagramRenderer, ImageFormat, RenderArtifact, RenderError, RenderRequest};

use std::sync::Arc;

use crate::config::{RenderSettings, RenderStrategy};

/// Build the renderer selected by configuration.
pub fn build_renderer(settings: &RenderSettings) -> Result<Arc<dyn DiagramRenderer>, RenderError> {
    match settings.strategy {
        RenderStrategy::Chromium => Ok(Arc::new(ChromiumRenderer::new(ChromiumSettings {
            chrome_path: settings.chrome_path.clone(),
            mermaid_js_url: settings.mermaid_js_url.clone(),
            theme: settings.theme.clone(),
            format: settings.format,
            transparent_background: settings.transparent_background,
            width: settings.width,
            height: settings.height,
            timeout: settings.timeout,
        }))),
        RenderStrategy::MermaidCli => {
            let renderer = MermaidCliRenderer::new(MermaidCliSettings {
                cli_path: settings.mermaid_cli_path.clone(),
                scratch_dir: settings.scratch_dir.clone(),
                theme: settings.theme.clone(),
                width: settings.width,
                height: settings.height,
                timeout: settings.timeout,
            })?;
            Ok(Arc::new(renderer))
        }
    }
}
