use std::{io, str::FromStr, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::error::CdpError;
use thiserror::Error;

/// Rendering request passed to a [`DiagramRenderer`] strategy.
///
/// Presence validation happens at the HTTP boundary; by the time a request
/// reaches a renderer the source is known to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Raw Mermaid source captured from the request body.
    pub source: String,
}

impl RenderRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Finished image produced by a renderer, owned by the handler until it is
/// written to the response.
#[derive(Debug, Clone)]
pub struct RenderArtifact {
    pub bytes: Bytes,
    pub mime_type: &'static str,
}

/// Raster formats the Chromium strategy can capture.
///
/// The Mermaid CLI renders PNG only; configuration rejects the mismatch at
/// startup rather than per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(format!(
                "unknown image format `{other}` (expected `png`, `jpeg`, or `webp`)"
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("headless browser failed to launch: {0}")]
    Launch(String),
    #[error("Mermaid CLI unavailable: {0}")]
    Spawn(io::Error),
    #[error("render did not complete within {0:?}")]
    Timeout(Duration),
    #[error("rendered diagram element was not found in the page")]
    ElementNotFound,
    #[error("diagram rendering was rejected by the backend: {detail}")]
    Diagram {
        exit_code: Option<i32>,
        detail: String,
    },
    #[error("browser session error: {0}")]
    Browser(#[from] CdpError),
    #[error("scratch file I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Strategy seam between the HTTP handler and a rendering backend. Each call
/// owns its transient resources (browser session or temp files) and releases
/// them on every exit path before returning.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderArtifact, RenderError>;
}
