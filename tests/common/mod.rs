#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use assistant_gateway::config::{GatewayConfig, QueryMode};
use assistant_gateway::routes::create_router;
use assistant_gateway::state::AppState;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use tower::util::ServiceExt;

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_upstream(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// Fast timings so failure paths finish quickly.
pub fn test_config(endpoints: Vec<String>) -> GatewayConfig {
    GatewayConfig {
        upstream_endpoints: endpoints,
        upstream_path: "/bot".to_string(),
        request_timeout: Duration::from_millis(500),
        max_retries: 3,
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(50),
        backoff_jitter: Duration::ZERO,
        query_mode: QueryMode::LastUser,
        public_access: true,
        ..GatewayConfig::default()
    }
}

pub fn gateway(config: GatewayConfig) -> Router {
    let state = Arc::new(AppState::new(config).unwrap());
    create_router(state)
}

pub async fn post_chat(app: Router, body: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Pulls the `delta.content` values out of an SSE body, plus whether `[DONE]` came last.
pub fn sse_contents(body: &str) -> (Vec<String>, bool) {
    let mut contents = Vec::new();
    let mut done_last = false;
    for frame in body.split("\n\n").filter(|f| !f.trim().is_empty()) {
        let data = frame.trim().trim_start_matches("data: ");
        if data == "[DONE]" {
            done_last = true;
            continue;
        }
        done_last = false;
        let json: serde_json::Value = serde_json::from_str(data).unwrap();
        contents.push(
            json["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }
    (contents, done_last)
}
