//! HTTP gateway: the chat API over the routing workflow.
//!
//! Every route answers JSON except `POST /api/chat/stream`, which answers
//! `text/event-stream`. Request bodies are capped by `gateway.max_body_bytes`
//! and each request by `gateway.request_timeout_secs`.

pub mod api;

use anyhow::{Context, Result};
use axum::{
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use crate::config::Config;
use crate::workflow::RouterWorkflow;

/// Shared state for all gateway handlers.
#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<RouterWorkflow>,
}

/// Build the gateway router with body-limit and timeout layers.
pub fn create_router(state: AppState, max_body_bytes: usize, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(api::handle_health))
        .route("/api/chat", post(api::handle_chat))
        .route("/api/chat/stream", post(api::handle_chat_stream))
        .route("/api/agents", get(api::handle_agents))
        .route(
            "/api/sessions/{thread_id}",
            get(api::handle_session_get).delete(api::handle_session_delete),
        )
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(middleware::map_response(json_payload_too_large))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// The body-limit layer rejects an oversized `Content-Length` with plain text;
/// answer with the same JSON error shape as every other route.
async fn json_payload_too_large(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes().starts_with(b"application/json"));
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        return api::error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
            .into_response();
    }
    response
}

/// Loopback names and addresses are safe to bind without opting in.
fn is_public_bind(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        Ok(ip) => !ip.is_loopback(),
        Err(_) => true,
    }
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: set gateway.allow_public_bind = true to expose the gateway"
        );
    }

    let workflow = RouterWorkflow::from_config(&config).await?;
    let state = AppState {
        workflow: Arc::new(workflow),
    };
    let app = create_router(
        state,
        config.gateway.max_body_bytes,
        Duration::from_secs(config.gateway.request_timeout_secs),
    );

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Gateway shutting down");
        })
        .await
        .context("Gateway server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockCall, MockProvider};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_app(route: &'static str) -> Router {
        let provider = Arc::new(MockProvider::new(move |call: &MockCall| {
            let system = call.system_prompt().unwrap_or_default();
            if system.starts_with("You are a routing expert.") {
                Ok(MockProvider::text(route))
            } else if system.starts_with("You combine answers") {
                Ok(MockProvider::text("combined"))
            } else if system.starts_with("You are a news reporter") {
                anyhow::bail!("NewsAPI exploded")
            } else {
                Ok(MockProvider::text(&format!(
                    "answer to {}",
                    call.last_user().unwrap_or_default()
                )))
            }
        }));
        let workflow = RouterWorkflow::with_provider(&Config::default(), provider, "").unwrap();
        create_router(
            AppState {
                workflow: Arc::new(workflow),
            },
            1024,
            Duration::from_secs(5),
        )
    }

    fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn loopback_hosts_are_not_public() {
        assert!(!is_public_bind("127.0.0.1"));
        assert!(!is_public_bind("localhost"));
        assert!(!is_public_bind("::1"));
        assert!(!is_public_bind("[::1]"));
        assert!(is_public_bind("0.0.0.0"));
        assert!(is_public_bind("192.168.1.20"));
        assert!(is_public_bind("example.com"));
    }

    #[tokio::test]
    async fn run_gateway_refuses_public_bind_by_default() {
        let err = run_gateway("0.0.0.0", 0, Config::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("allow_public_bind"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = test_app(r#"{"steps":["general"]}"#)
            .oneshot(empty_request("GET", "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn chat_returns_outputs_decision_and_combined() {
        let response = test_app(r#"{"steps":["general"]}"#)
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({
                    "messages": [
                        {"role": "user", "content": "earlier"},
                        {"role": "assistant", "content": "reply"},
                        {"role": "user", "content": "Tell me a fact"}
                    ]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["decision"], serde_json::json!(["general"]));
        assert_eq!(body["outputs"][0]["agent"], "general");
        assert_eq!(body["combinedOutputs"], "answer to Tell me a fact");
    }

    #[tokio::test]
    async fn chat_rejects_empty_messages_and_blank_input() {
        let app = test_app(r#"{"steps":["general"]}"#);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({ "messages": [] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "messages must not be empty");

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({ "messages": [{"role": "user", "content": "  "}] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_rejects_malformed_json_as_json_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = test_app(r#"{"steps":["general"]}"#)
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn chat_rejects_oversized_body() {
        let big = "x".repeat(4096);
        let response = test_app(r#"{"steps":["general"]}"#)
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({ "messages": [{"role": "user", "content": big}] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn oversized_content_length_gets_json_error() {
        let body = serde_json::json!({ "messages": [{"role": "user", "content": "x".repeat(4096)}] })
            .to_string();
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .header("content-length", body.len())
            .body(Body::from(body))
            .unwrap();

        let response = test_app(r#"{"steps":["general"]}"#)
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );
        assert_eq!(body_json(response).await["error"], "request body too large");
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_bad_gateway() {
        let response = test_app(r#"{"steps":["news"]}"#)
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({ "messages": [{"role": "user", "content": "headlines?"}] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let error = body_json(response).await["error"].as_str().unwrap().to_string();
        assert!(error.contains("NewsAPI exploded"));
    }

    #[tokio::test]
    async fn chat_stream_emits_sse_events() {
        let response = test_app(r#"{"steps":["weather","general"]}"#)
            .oneshot(json_request(
                "POST",
                "/api/chat/stream",
                &serde_json::json!({ "messages": [{"role": "user", "content": "both"}] }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: decision"));
        assert_eq!(text.matches("event: agent_output").count(), 2);
        assert!(text.contains("event: delta"));
        assert!(text.contains("event: combined"));
        assert!(text.contains(r#""content":"combined""#));
    }

    #[tokio::test]
    async fn agents_lists_bound_tools() {
        let response = test_app(r#"{"steps":["general"]}"#)
            .oneshot(empty_request("GET", "/api/agents"))
            .await
            .unwrap();
        let body = body_json(response).await;
        let agents = body["agents"].as_array().unwrap();
        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0]["id"], "weather");
        assert_eq!(agents[0]["tools"][0]["name"], "get_weather");
        assert_eq!(agents[1]["tools"][0]["name"], "get_news");
        assert!(agents[2]["tools"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sessions_can_be_read_and_deleted() {
        let app = test_app(r#"{"steps":["general"]}"#);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({
                    "messages": [{"role": "user", "content": "remember me"}],
                    "thread_id": "abc"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(empty_request("GET", "/api/sessions/abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["agents"][0]["agent"], "general");
        assert_eq!(body["agents"][0]["messages"][0]["content"], "remember me");

        let response = app
            .clone()
            .oneshot(empty_request("DELETE", "/api/sessions/abc"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["removed"], 1);

        let response = app
            .oneshot(empty_request("GET", "/api/sessions/abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn session_routes_trim_thread_id_like_chat() {
        let app = test_app(r#"{"steps":["general"]}"#);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                &serde_json::json!({
                    "messages": [{"role": "user", "content": "hi"}],
                    "thread_id": " t1 "
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(empty_request("GET", "/api/sessions/%20t1%20"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["thread_id"], "t1");

        let response = app
            .oneshot(empty_request("DELETE", "/api/sessions/%20t1%20"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["removed"], 1);
    }
}
