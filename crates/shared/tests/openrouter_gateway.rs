use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use shared::catalog::{Book, Catalog};
use shared::llm::{
    CatalogTools, ChatMessage, GatewayError, GenerationRequest, ModelGateway, OpenRouterGateway,
    OpenRouterGatewayConfig, OpenRouterModelRoute, RetryPolicy, RetryingGateway, Sanitizer,
    SignatureSet, ToolHandler,
};
use shared::portfolio::Portfolio;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct MockReply {
    status: StatusCode,
    body: Value,
}

#[derive(Debug, Clone)]
struct TestServerState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    seen_models: Arc<Mutex<Vec<String>>>,
    seen_auth_headers: Arc<Mutex<Vec<String>>>,
    seen_payloads: Arc<Mutex<Vec<Value>>>,
}

impl TestServerState {
    fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            seen_models: Arc::new(Mutex::new(Vec::new())),
            seen_auth_headers: Arc::new(Mutex::new(Vec::new())),
            seen_payloads: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[tokio::test]
async fn generate_tier_uses_generate_model_and_parses_response() {
    let state = TestServerState::with_replies(vec![MockReply {
        status: StatusCode::OK,
        body: success_response_body("generate-model", "こんにちは！ [EMOTION:greeting]"),
    }]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = OpenRouterGateway::new(config_for(url)).expect("gateway should build");
    let response = gateway
        .generate(GenerationRequest::generate(
            "system rules",
            vec![ChatMessage::user("こんにちは")],
            None,
            CancellationToken::new(),
        ))
        .await
        .expect("generate call should succeed");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert_eq!(response.model, "generate-model");
    assert_eq!(response.text, "こんにちは！ [EMOTION:greeting]");
    assert_eq!(response.provider_request_id.as_deref(), Some("req-success"));
    let usage = response.usage.expect("usage should be reported");
    assert_eq!(usage.total_tokens, 20);

    let seen_models = state.seen_models.lock().await.clone();
    assert_eq!(seen_models, vec!["generate-model".to_string()]);
    let seen_auth_headers = state.seen_auth_headers.lock().await.clone();
    assert_eq!(
        seen_auth_headers,
        vec!["Bearer test-openrouter-key".to_string()]
    );

    let payloads = state.seen_payloads.lock().await.clone();
    assert_eq!(payloads[0]["messages"][0]["role"], "system");
    assert_eq!(payloads[0]["messages"][0]["content"], "system rules");
    assert_eq!(payloads[0]["messages"][1]["role"], "user");
    assert_eq!(payloads[0]["max_tokens"], 2048);
    assert!(payloads[0].get("tools").is_none());
}

#[tokio::test]
async fn assist_tier_uses_assist_model_without_system_prompt() {
    let state = TestServerState::with_replies(vec![MockReply {
        status: StatusCode::OK,
        body: success_response_body("assist-model", "short answer"),
    }]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = OpenRouterGateway::new(config_for(url)).expect("gateway should build");
    gateway
        .generate(GenerationRequest::assist(
            "rewrite this",
            CancellationToken::new(),
        ))
        .await
        .expect("assist call should succeed");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    let seen_models = state.seen_models.lock().await.clone();
    assert_eq!(seen_models, vec!["assist-model".to_string()]);
    let payloads = state.seen_payloads.lock().await.clone();
    assert_eq!(payloads[0]["messages"][0]["role"], "user");
    assert_eq!(payloads[0]["max_tokens"], 256);
}

#[tokio::test]
async fn too_many_requests_maps_to_quota_exhausted() {
    let state = TestServerState::with_replies(vec![provider_error_reply(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
    )]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = OpenRouterGateway::new(config_for(url)).expect("gateway should build");
    let err = gateway
        .generate(plain_request())
        .await
        .expect_err("429 should fail");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(
        matches!(
            err,
            GatewayError::QuotaExhausted {
                retry_after_seconds: 60
            }
        ),
        "expected quota exhaustion, got {err:?}"
    );
}

#[tokio::test]
async fn resource_exhausted_status_maps_to_quota_exhausted() {
    let state = TestServerState::with_replies(vec![MockReply {
        status: StatusCode::BAD_REQUEST,
        body: json!({
            "error": {
                "code": 400,
                "status": "RESOURCE_EXHAUSTED"
            }
        }),
    }]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = OpenRouterGateway::new(config_for(url)).expect("gateway should build");
    let err = gateway
        .generate(plain_request())
        .await
        .expect_err("quota payload should fail");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(matches!(err, GatewayError::QuotaExhausted { .. }));
}

#[tokio::test]
async fn unauthorized_is_a_provider_failure() {
    let state = TestServerState::with_replies(vec![provider_error_reply(
        StatusCode::UNAUTHORIZED,
        "invalid_api_key",
    )]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = OpenRouterGateway::new(config_for(url)).expect("gateway should build");
    let err = gateway
        .generate(plain_request())
        .await
        .expect_err("401 should fail");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(
        matches!(err, GatewayError::ProviderFailure(ref message) if message.contains("status=401")),
        "expected structured unauthorized provider error, got {err:?}"
    );
}

#[tokio::test]
async fn retrying_gateway_recovers_from_unavailable_provider() {
    let state = TestServerState::with_replies(vec![
        provider_error_reply(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
        MockReply {
            status: StatusCode::OK,
            body: success_response_body("generate-model", "recovered"),
        },
    ]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = RetryingGateway::new(
        OpenRouterGateway::new(config_for(url)).expect("gateway should build"),
        RetryPolicy {
            attempt_timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff_step: Duration::from_millis(10),
            overall_deadline: None,
        },
    );
    let response = gateway
        .generate(plain_request())
        .await
        .expect("retry should recover");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert_eq!(response.text, "recovered");
    assert_eq!(state.seen_models.lock().await.len(), 2);
}

#[tokio::test]
async fn tool_calls_are_executed_and_fed_back() {
    let state = TestServerState::with_replies(vec![
        MockReply {
            status: StatusCode::OK,
            body: tool_call_response_body(
                "call-1",
                "get_book_details",
                r#"{"book_id":"book-002"}"#,
            ),
        },
        MockReply {
            status: StatusCode::OK,
            body: success_response_body(
                "generate-model",
                "[item::Designing Data-Intensive Applications::book-002] is a favorite.",
            ),
        },
    ]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = OpenRouterGateway::new(config_for(url)).expect("gateway should build");
    let response = gateway
        .generate(GenerationRequest::generate(
            "system rules",
            vec![ChatMessage::user("Tell me about DDIA")],
            Some(catalog_tools()),
            CancellationToken::new(),
        ))
        .await
        .expect("tool loop should finish");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    assert!(response.text.contains("book-002"));
    let usage = response.usage.expect("usage should be summed");
    assert_eq!(usage.total_tokens, 40);

    let payloads = state.seen_payloads.lock().await.clone();
    assert_eq!(payloads.len(), 2);
    let declared = payloads[0]["tools"]
        .as_array()
        .expect("tools should be declared")
        .iter()
        .filter_map(|tool| tool["function"]["name"].as_str())
        .collect::<Vec<_>>();
    assert!(declared.contains(&"get_book_details"));

    let follow_up = payloads[1]["messages"]
        .as_array()
        .expect("messages should be an array");
    let assistant = &follow_up[follow_up.len() - 2];
    assert_eq!(assistant["role"], "assistant");
    assert_eq!(assistant["tool_calls"][0]["id"], "call-1");
    let tool_message = &follow_up[follow_up.len() - 1];
    assert_eq!(tool_message["role"], "tool");
    assert_eq!(tool_message["tool_call_id"], "call-1");
    let tool_result: Value = serde_json::from_str(
        tool_message["content"]
            .as_str()
            .expect("tool content should be a string"),
    )
    .expect("tool content should be json");
    assert_eq!(tool_result["book"]["id"], "book-002");
}

#[tokio::test]
async fn invalid_tool_arguments_are_reported_to_the_model() {
    let state = TestServerState::with_replies(vec![
        MockReply {
            status: StatusCode::OK,
            body: tool_call_response_body("call-9", "search_books", r#"{"q":"rust"}"#),
        },
        MockReply {
            status: StatusCode::OK,
            body: success_response_body("generate-model", "Nothing matched."),
        },
    ]);
    let (url, shutdown_tx, server_task) = spawn_test_server(state.clone()).await;

    let gateway = OpenRouterGateway::new(config_for(url)).expect("gateway should build");
    gateway
        .generate(GenerationRequest::generate(
            "system rules",
            vec![ChatMessage::user("rust books?")],
            Some(catalog_tools()),
            CancellationToken::new(),
        ))
        .await
        .expect("tool loop should finish");

    shutdown_tx.send(()).expect("shutdown signal should send");
    server_task.await.expect("server task should join");

    let payloads = state.seen_payloads.lock().await.clone();
    let follow_up = payloads[1]["messages"]
        .as_array()
        .expect("messages should be an array");
    let tool_message = follow_up.last().expect("tool message should be present");
    let tool_result: Value = serde_json::from_str(
        tool_message["content"]
            .as_str()
            .expect("tool content should be a string"),
    )
    .expect("tool content should be json");
    assert!(tool_result.get("error").is_some());
}

fn plain_request() -> GenerationRequest {
    GenerationRequest::generate(
        "system rules",
        vec![ChatMessage::user("hello")],
        None,
        CancellationToken::new(),
    )
}

fn catalog_tools() -> Arc<dyn ToolHandler> {
    let catalog = Catalog::new(vec![Book {
        id: "book-002".to_string(),
        title: "Designing Data-Intensive Applications".to_string(),
        author: "Martin Kleppmann".to_string(),
        isbn: "9781449373320".to_string(),
        cover: String::new(),
        finished_at: "2025-03-01".to_string(),
        private_notes: "Replication chapters were the highlight.".to_string(),
        link: String::new(),
        language: "en".to_string(),
    }])
    .expect("catalog should build");

    Arc::new(CatalogTools::new(
        Arc::new(catalog),
        Arc::new(Portfolio::default()),
        Sanitizer::new(Arc::new(SignatureSet::baseline())),
    ))
}

fn config_for(chat_completions_url: String) -> OpenRouterGatewayConfig {
    OpenRouterGatewayConfig {
        chat_completions_url,
        api_key: "test-openrouter-key".to_string(),
        model_route: OpenRouterModelRoute {
            generate_model: "generate-model".to_string(),
            assist_model: "assist-model".to_string(),
        },
    }
}

fn success_response_body(model: &str, content: &str) -> Value {
    json!({
        "id": "req-success",
        "model": model,
        "choices": [
            {
                "message": {
                    "content": content
                }
            }
        ],
        "usage": {
            "prompt_tokens": 12,
            "completion_tokens": 8,
            "total_tokens": 20
        }
    })
}

fn tool_call_response_body(call_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "id": "req-tool",
        "model": "generate-model",
        "choices": [
            {
                "message": {
                    "content": null,
                    "tool_calls": [
                        {
                            "id": call_id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": arguments
                            }
                        }
                    ]
                }
            }
        ],
        "usage": {
            "prompt_tokens": 12,
            "completion_tokens": 8,
            "total_tokens": 20
        }
    })
}

fn provider_error_reply(status: StatusCode, code: &str) -> MockReply {
    MockReply {
        status,
        body: json!({
            "error": {
                "code": code
            }
        }),
    }
}

async fn spawn_test_server(
    state: TestServerState,
) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/chat/completions", post(test_chat_completions_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let local_addr = listener
        .local_addr()
        .expect("listener address should resolve");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        server.await.expect("test server should run");
    });

    (
        format!("http://{local_addr}/chat/completions"),
        shutdown_tx,
        server_task,
    )
}

async fn test_chat_completions_handler(
    State(state): State<TestServerState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(model) = payload.get("model").and_then(Value::as_str) {
        state.seen_models.lock().await.push(model.to_string());
    }

    if let Some(value) = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
    {
        state.seen_auth_headers.lock().await.push(value.to_string());
    }
    state.seen_payloads.lock().await.push(payload);

    let reply = state.replies.lock().await.pop_front().unwrap_or(MockReply {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: json!({
            "error": {
                "code": "exhausted_test_replies"
            }
        }),
    });

    (reply.status, Json(reply.body))
}
