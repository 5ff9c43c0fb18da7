use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use protobridge::config::{BridgeConfig, ProviderConfig, RetryConfig};
use protobridge::error::BridgeError;
use protobridge::protocol::canonical::{
    FinishReason, GenerateRequest, NormalizedResponse, Turn, TurnRole, WireProtocol,
};
use protobridge::routing::ProviderRouter;
use serde_json::{json, Value};

const CHAT_SSE: &str = concat!(
    "data: {\"id\":\"chatcmpl_s\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Reading\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" now\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"read_file\",\"arguments\":\"\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"pa\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"th\\\":\\\"x\\\"}\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":3,\"total_tokens\":10}}\n\n",
    "data: [DONE]\n\n",
);

const RESPONSES_SSE: &str = concat!(
    "event: response.created\n",
    "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_s\"}}\n\n",
    "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hi\"}\n\n",
    "data: {\"type\":\"response.output_item.added\",\"output_index\":1,\"item\":{\"type\":\"function_call\",\"call_id\":\"fc_1\",\"name\":\"read_file\"}}\n\n",
    "data: {\"type\":\"response.function_call_arguments.delta\",\"output_index\":1,\"delta\":\"{\\\"path\\\":\"}\n\n",
    "data: {\"type\":\"response.function_call_arguments.delta\",\"output_index\":1,\"delta\":\"\\\"x\\\"}\"}\n\n",
    "data: {\"type\":\"response.function_call_arguments.done\",\"output_index\":1}\n\n",
    "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_s\",\"usage\":{\"input_tokens\":4,\"output_tokens\":6}}}\n\n",
);

async fn spawn_sse(path: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        path,
        post(move |Json(request): Json<Value>| async move {
            if request["stream"] != json!(true) {
                return (StatusCode::BAD_REQUEST, "expected stream: true").into_response();
            }
            ([(CONTENT_TYPE, "text/event-stream")], body).into_response()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/v1"), server)
}

fn build_router(base_url: String, protocol: WireProtocol) -> ProviderRouter {
    let mut provider = ProviderConfig::new(base_url, "gpt-test");
    provider.protocol = protocol;
    let mut config = BridgeConfig::new(provider);
    config.retry = RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    };
    ProviderRouter::new(&config).expect("router")
}

fn prompt() -> GenerateRequest {
    GenerateRequest {
        contents: vec![Turn::text(TurnRole::User, "read x")],
        ..GenerateRequest::default()
    }
}

async fn collect(router: &ProviderRouter) -> Vec<NormalizedResponse> {
    router
        .generate_stream(&prompt())
        .await
        .expect("open stream")
        .map(|item| item.expect("fragment"))
        .collect()
        .await
}

fn assert_single_terminal(fragments: &[NormalizedResponse]) {
    let finishes: Vec<_> = fragments
        .iter()
        .filter(|f| f.finish_reason().is_some())
        .collect();
    assert_eq!(finishes.len(), 1);
    assert!(fragments.last().and_then(NormalizedResponse::finish_reason).is_some());
}

#[tokio::test]
async fn test_chat_stream_through_router() {
    let (base_url, server) = spawn_sse("/v1/chat/completions", CHAT_SSE).await;
    let router = build_router(base_url, WireProtocol::Chat);
    let fragments = collect(&router).await;

    let text: String = fragments.iter().map(NormalizedResponse::text).collect();
    assert_eq!(text, "Reading now");

    let calls: Vec<_> = fragments.iter().flat_map(|f| f.function_calls()).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id.as_deref(), Some("call_1"));
    assert_eq!(calls[0].args, json!({"path": "x"}));

    assert_single_terminal(&fragments);
    let last = fragments.last().expect("terminal");
    assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(last.usage_metadata.map(|u| u.total_token_count), Some(10));
    server.abort();
}

#[tokio::test]
async fn test_responses_stream_through_router() {
    let (base_url, server) = spawn_sse("/v1/responses", RESPONSES_SSE).await;
    let router = build_router(base_url, WireProtocol::Responses);
    let fragments = collect(&router).await;

    assert_eq!(fragments[0].text(), "Hi");
    let calls: Vec<_> = fragments.iter().flat_map(|f| f.function_calls()).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id.as_deref(), Some("fc_1"));
    assert_eq!(calls[0].args, json!({"path": "x"}));

    assert_single_terminal(&fragments);
    let last = fragments.last().expect("terminal");
    assert_eq!(last.response_id.as_deref(), Some("resp_s"));
    assert_eq!(last.usage_metadata.map(|u| u.total_token_count), Some(10));
    server.abort();
}

#[tokio::test]
async fn test_stream_closed_without_finish_still_terminates() {
    let (base_url, server) = spawn_sse(
        "/v1/chat/completions",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\n",
    )
    .await;
    let router = build_router(base_url, WireProtocol::Chat);
    let fragments = collect(&router).await;

    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].text(), "partial");
    assert_eq!(fragments[1].finish_reason(), Some(FinishReason::Stop));
    server.abort();
}

#[tokio::test]
async fn test_stream_rejection_surfaces_before_any_fragment() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "invalid api key"}})),
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let router = build_router(format!("http://{addr}/v1"), WireProtocol::Chat);
    let result = router.generate_stream(&prompt()).await;
    match result {
        Err(BridgeError::Upstream { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "invalid api key");
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("expected rejection"),
    }
    server.abort();
}

#[tokio::test]
async fn test_stream_timeout_reply_is_retried_before_streaming() {
    let hits = Arc::new(AtomicUsize::new(0));
    let handler_hits = hits.clone();
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let hits = handler_hits.clone();
            async move {
                if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    return (
                        StatusCode::REQUEST_TIMEOUT,
                        Json(json!({"error": {"message": "Request timeout"}})),
                    )
                        .into_response();
                }
                ([(CONTENT_TYPE, "text/event-stream")], CHAT_SSE).into_response()
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let mut provider = ProviderConfig::new(format!("http://{addr}/v1"), "gpt-test");
    provider.protocol = WireProtocol::Chat;
    let mut config = BridgeConfig::new(provider);
    config.retry = RetryConfig {
        max_attempts: 2,
        base_delay_ms: 5,
        max_delay_ms: 10,
        jitter_ratio: 0.0,
    };
    let router = ProviderRouter::new(&config).expect("router");
    let fragments = collect(&router).await;

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    let text: String = fragments.iter().map(NormalizedResponse::text).collect();
    assert_eq!(text, "Reading now");
    assert_single_terminal(&fragments);
    server.abort();
}
