use std::{
    future,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use tratto::application::render::{
    DiagramRenderer, RenderArtifact, RenderError, RenderRequest,
};
use tratto::infra::http::{HttpState, build_router};

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

enum Behavior {
    Succeed,
    RejectDiagram,
    Hang,
}

/// Test double standing in for a rendering backend; counts invocations so
/// validation failures can assert the renderer was never touched.
struct StubRenderer {
    calls: AtomicUsize,
    behavior: Behavior,
}

impl StubRenderer {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            behavior,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagramRenderer for StubRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderArtifact, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(RenderArtifact {
                bytes: Bytes::from([PNG_MAGIC, request.source.as_bytes()].concat()),
                mime_type: "image/png",
            }),
            Behavior::RejectDiagram => Err(RenderError::Diagram {
                exit_code: Some(1),
                detail: "Parse error on line 1: unexpected token".to_string(),
            }),
            Behavior::Hang => {
                future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

fn build_app(renderer: Arc<StubRenderer>, deadline: Duration) -> Router {
    build_router(HttpState {
        renderer,
        render_deadline: deadline,
    })
}

async fn post_render(app: Router, body: String) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/render")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    (status, headers, bytes)
}

fn error_body(bytes: &Bytes) -> serde_json::Value {
    serde_json::from_slice(bytes).expect("error body must be JSON")
}

#[tokio::test]
async fn missing_source_returns_400_without_invoking_renderer() {
    let renderer = StubRenderer::new(Behavior::Succeed);
    let app = build_app(renderer.clone(), Duration::from_secs(5));

    let (status, _, bytes) = post_render(app, "{}".to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = error_body(&bytes);
    assert!(body["error"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(body["code"], "invalid_input");
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn blank_source_returns_400_without_invoking_renderer() {
    let renderer = StubRenderer::new(Behavior::Succeed);
    let app = build_app(renderer.clone(), Duration::from_secs(5));

    let body = serde_json::json!({ "mermaid": "   \n  " }).to_string();
    let (status, _, bytes) = post_render(app, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_body(&bytes)["code"], "invalid_input");
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn render_success_streams_image_bytes() {
    let renderer = StubRenderer::new(Behavior::Succeed);
    let app = build_app(renderer.clone(), Duration::from_secs(5));

    let body = serde_json::json!({ "mermaid": "graph TD\nA-->B" }).to_string();
    let (status, headers, bytes) = post_render(app, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(b"image/png".as_slice())
    );
    assert_eq!(
        headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok()),
        Some(bytes.len().to_string().as_str())
    );
    assert!(bytes.starts_with(PNG_MAGIC));
    assert!(!bytes.is_empty());
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn legacy_source_key_is_accepted() {
    let renderer = StubRenderer::new(Behavior::Succeed);
    let app = build_app(renderer.clone(), Duration::from_secs(5));

    let body = serde_json::json!({ "mermaidString": "graph TD\nA-->B" }).to_string();
    let (status, _, _) = post_render(app, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn backend_rejection_maps_to_render_error_without_leaking_detail() {
    let renderer = StubRenderer::new(Behavior::RejectDiagram);
    let app = build_app(renderer.clone(), Duration::from_secs(5));

    let body = serde_json::json!({ "mermaid": "graph TD\nA--?>B" }).to_string();
    let (status, _, bytes) = post_render(app, body).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = error_body(&bytes);
    assert_eq!(body["code"], "render_error");
    assert!(body["error"].as_str().is_some_and(|s| !s.is_empty()));

    // Internal backend diagnostics must never reach the client.
    let raw = String::from_utf8_lossy(&bytes);
    assert!(!raw.contains("Parse error"), "leaked diagnostic: {raw}");

    let request_id = body["request_id"].as_str().expect("request id present");
    Uuid::from_str(request_id).expect("request id is a uuid");
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn hung_renderer_times_out_within_deadline() {
    let renderer = StubRenderer::new(Behavior::Hang);
    let app = build_app(renderer.clone(), Duration::from_millis(250));

    let started_at = Instant::now();
    let body = serde_json::json!({ "mermaid": "graph TD\nA-->B" }).to_string();
    let (status, _, bytes) = post_render(app, body).await;

    assert!(
        started_at.elapsed() < Duration::from_secs(3),
        "timeout did not fire within the bound"
    );
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error_body(&bytes)["code"], "render_timeout");
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn healthz_reports_liveness() {
    let renderer = StubRenderer::new(Behavior::Succeed);
    let app = build_app(renderer, Duration::from_secs(5));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/healthz")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
