use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::{error::ErrorReport, render::RenderError};

use super::middleware::RequestContext;

pub mod codes {
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const LAUNCH_ERROR: &str = "launch_error";
    pub const SPAWN_ERROR: &str = "spawn_error";
    pub const RENDER_TIMEOUT: &str = "render_timeout";
    pub const ELEMENT_MISSING: &str = "element_missing";
    pub const RENDER_ERROR: &str = "render_error";
    pub const BROWSER_ERROR: &str = "browser_error";
    pub const IO_ERROR: &str = "io_error";
}

/// Wire shape for error responses: a stable public message, a machine code,
/// and the request id for log correlation. Internal diagnostics travel in the
/// attached [`ErrorReport`] instead of the body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    pub request_id: String,
}

#[derive(Debug)]
pub struct RenderHttpError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    report: ErrorReport,
    request_id: String,
}

impl RenderHttpError {
    pub fn invalid_input(ctx: &RequestContext) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: codes::INVALID_INPUT,
            message: "request body must carry a non-empty `mermaid` string",
            report: ErrorReport::from_message(
                "infra::http::render",
                StatusCode::BAD_REQUEST,
                "missing or empty diagram source",
            ),
            request_id: ctx.request_id.clone(),
        }
    }

    pub fn from_render_error(error: &RenderError, ctx: &RequestContext) -> Self {
        let (status, code, message) = match error {
            RenderError::Launch(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::LAUNCH_ERROR,
                "renderer backend failed to start",
            ),
            RenderError::Spawn(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::SPAWN_ERROR,
                "renderer backend failed to start",
            ),
            RenderError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                codes::RENDER_TIMEOUT,
                "diagram render timed out",
            ),
            RenderError::ElementNotFound => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::ELEMENT_MISSING,
                "rendered diagram could not be located",
            ),
            RenderError::Diagram { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::RENDER_ERROR,
                "diagram rendering failed",
            ),
            RenderError::Browser(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::BROWSER_ERROR,
                "browser session failed",
            ),
            RenderError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::IO_ERROR,
                "scratch file I/O failed",
            ),
        };

        Self {
            status,
            code,
            message,
            report: ErrorReport::from_error("infra::http::render", status, error),
            request_id: ctx.request_id.clone(),
        }
    }
}

impl IntoResponse for RenderHttpError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message.to_string(),
            code: self.code,
            request_id: self.request_id,
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}
