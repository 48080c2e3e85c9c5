use axum::{
    Extension, Json,
    body::Body,
    extract::State,
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::application::render::{RenderArtifact, RenderError, RenderRequest};

use super::{HttpState, error::RenderHttpError, middleware::RequestContext};

#[derive(Debug, Deserialize)]
pub struct RenderBody {
    /// Diagram source; `mermaidString` is accepted for legacy clients.
    #[serde(default, alias = "mermaidString")]
    mermaid: Option<String>,
}

impl RenderBody {
    fn source(&self) -> Option<&str> {
        self.mermaid
            .as_deref()
            .map(str::trim)
            .filter(|source| !source.is_empty())
    }
}

/// Validate the diagram source, dispatch to the configured renderer under the
/// per-request deadline, and stream the captured image back.
pub async fn render_diagram(
    State(state): State<HttpState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<RenderBody>,
) -> Response {
    let Some(source) = body.source() else {
        return RenderHttpError::invalid_input(&ctx).into_response();
    };

    let request = RenderRequest::new(source);
    let rendered =
        tokio::time::timeout(state.render_deadline, state.renderer.render(&request)).await;

    match rendered {
        Ok(Ok(artifact)) => artifact_response(artifact),
        Ok(Err(err)) => RenderHttpError::from_render_error(&err, &ctx).into_response(),
        Err(_) => {
            let err = RenderError::Timeout(state.render_deadline);
            RenderHttpError::from_render_error(&err, &ctx).into_response()
        }
    }
}

pub async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn artifact_response(artifact: RenderArtifact) -> Response {
    let length = artifact.bytes.len();
    let mut response = Response::new(Body::from(artifact.bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(artifact.mime_type));
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }

    response
}
