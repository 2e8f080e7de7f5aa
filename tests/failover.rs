//! Integration tests driving the client manager and adapters against mock
//! HTTP backends.

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llmux::{
    BackendKind, ChatMessage, ChatRequest, ClientManager, LlmError, PromptKind, Provider,
    ProviderDescriptor, RequestRouter, RoutingRule,
};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ollama_descriptor(id: &str, uri: &str) -> ProviderDescriptor {
    ProviderDescriptor::new(id, BackendKind::Ollama, "codellama:7b").with_base_url(uri)
}

fn request(text: &str) -> ChatRequest {
    ChatRequest::new("codellama:7b", vec![ChatMessage::user(text)])
}

/// Mounts an Ollama health surface: root ping plus a tag listing carrying
/// the configured model.
async fn mount_ollama_health(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ollama is running"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "codellama:7b-instruct"}]
        })))
        .mount(server)
        .await;
}

fn ollama_chat_reply(content: &str) -> serde_json::Value {
    json!({
        "message": {"role": "assistant", "content": content},
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": 11,
        "eval_count": 5,
        "eval_duration": 250_000_000u64,
        "total_duration": 300_000_000u64,
    })
}

#[tokio::test]
async fn failing_primary_falls_back_to_secondary() {
    init_tracing();
    let a = MockServer::start().await;
    let b = MockServer::start().await;

    mount_ollama_health(&a).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
        .expect(1)
        .mount(&a)
        .await;

    mount_ollama_health(&b).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_chat_reply("let x = 1;")))
        .expect(1)
        .mount(&b)
        .await;

    let manager = ClientManager::new();
    manager.register(
        Provider::from_descriptor(ollama_descriptor("a", &a.uri())).unwrap(),
        true,
    );
    manager.register(
        Provider::from_descriptor(ollama_descriptor("b", &b.uri())).unwrap(),
        false,
    );

    let response = manager.complete_with_fallback(&request("hi")).await.unwrap();
    assert_eq!(response.content, "let x = 1;");
    assert_eq!(response.usage.prompt_tokens, 11);
    assert_eq!(response.usage.completion_tokens, 5);
    assert_eq!(response.usage.total_tokens, 16);
    // 5 tokens over 0.25s of eval time
    assert_eq!(response.usage.tokens_per_second, Some(20.0));
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn empty_content_advances_to_next_candidate() {
    init_tracing();
    let a = MockServer::start().await;
    let b = MockServer::start().await;

    mount_ollama_health(&a).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_chat_reply("")))
        .mount(&a)
        .await;

    mount_ollama_health(&b).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_chat_reply("fallback wins")))
        .mount(&b)
        .await;

    let manager = ClientManager::new();
    manager.register(
        Provider::from_descriptor(ollama_descriptor("a", &a.uri())).unwrap(),
        true,
    );
    manager.register(
        Provider::from_descriptor(ollama_descriptor("b", &b.uri())).unwrap(),
        false,
    );

    let response = manager.complete_with_fallback(&request("hi")).await.unwrap();
    assert_eq!(response.content, "fallback wins");
}

#[tokio::test]
async fn unreachable_candidate_is_skipped_but_counted() {
    init_tracing();
    // A dead socket: bind, take the address, drop the listener.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let b = MockServer::start().await;
    mount_ollama_health(&b).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_chat_reply("alive")))
        .mount(&b)
        .await;

    let manager = ClientManager::new();
    manager.register(
        Provider::from_descriptor(ollama_descriptor("dead", &dead)).unwrap(),
        true,
    );
    manager.register(
        Provider::from_descriptor(ollama_descriptor("b", &b.uri())).unwrap(),
        false,
    );

    let response = manager.complete_with_fallback(&request("hi")).await.unwrap();
    assert_eq!(response.content, "alive");
}

#[tokio::test]
async fn exhaustion_names_every_attempt_in_order() {
    init_tracing();
    let a = MockServer::start().await;
    let b = MockServer::start().await;

    for server in [&a, &b] {
        mount_ollama_health(server).await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(1)
            .mount(server)
            .await;
    }

    let manager = ClientManager::new();
    manager.register(
        Provider::from_descriptor(ollama_descriptor("a", &a.uri())).unwrap(),
        true,
    );
    manager.register(
        Provider::from_descriptor(ollama_descriptor("b", &b.uri())).unwrap(),
        false,
    );

    let err = manager.complete_with_fallback(&request("hi")).await.unwrap_err();
    match err {
        LlmError::Exhausted { attempted, source } => {
            assert_eq!(attempted, vec!["a".to_string(), "b".to_string()]);
            let cause = source.expect("last cause");
            assert!(matches!(*cause, LlmError::Transport { .. }));
            assert!(cause.to_string().contains("503"));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn router_preference_is_dispatched_first() {
    init_tracing();
    let local = MockServer::start().await;
    let gpu = MockServer::start().await;

    mount_ollama_health(&local).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_chat_reply("from local")))
        .mount(&local)
        .await;

    mount_ollama_health(&gpu).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_chat_reply("from gpu")))
        .expect(1)
        .mount(&gpu)
        .await;

    let manager = ClientManager::new();
    manager.register(
        Provider::from_descriptor(ollama_descriptor("local", &local.uri())).unwrap(),
        true,
    );
    manager.register(
        Provider::from_descriptor(ollama_descriptor("gpu", &gpu.uri())).unwrap(),
        false,
    );

    let router = RequestRouter::new(vec![RoutingRule::new(
        "task_complexity >= 'high'",
        "gpu",
        "heavy generation goes remote",
    )]);
    let preferred = router
        .resolve(&manager, PromptKind::GenerateService, "high")
        .unwrap();

    let response = manager
        .complete_routed(&request("hi"), Some(&preferred))
        .await
        .unwrap();
    assert_eq!(response.content, "from gpu");
}

#[tokio::test]
async fn check_all_health_reports_every_provider() {
    init_tracing();
    let alive = MockServer::start().await;
    mount_ollama_health(&alive).await;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let manager = ClientManager::new();
    manager.register(
        Provider::from_descriptor(ollama_descriptor("alive", &alive.uri())).unwrap(),
        true,
    );
    manager.register(
        Provider::from_descriptor(ollama_descriptor("dead", &dead)).unwrap(),
        false,
    );

    let health = manager.check_all_health().await;
    assert_eq!(health.len(), 2);
    assert!(health["alive"].reachable);
    assert!(health["alive"].model_loaded);
    assert_eq!(
        health["alive"].active_model.as_deref(),
        Some("codellama:7b-instruct")
    );
    assert!(!health["dead"].reachable);
}

#[tokio::test]
async fn openai_completion_sends_auth_and_parses_reply() {
    init_tracing();
    // SAFETY: variable name is unique to this test binary.
    unsafe { std::env::set_var("LLMUX_IT_OPENAI_KEY", "test-key") };

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "deepseek-coder",
            "max_tokens": 8192,
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "deepseek-coder-6.7b",
            "choices": [{
                "message": {"role": "assistant", "content": "fn add(a: i64, b: i64) -> i64 { a + b }"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 14, "total_tokens": 34},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let descriptor = ProviderDescriptor::new("oai", BackendKind::OpenAiCompatible, "deepseek-coder")
        .with_base_url(server.uri())
        .with_api_key_env("LLMUX_IT_OPENAI_KEY");
    let provider = Provider::from_descriptor(descriptor).unwrap();

    // An empty model name falls back to the descriptor's default model.
    let unnamed = ChatRequest::new("", vec![ChatMessage::user("add fn")]);
    let response = provider.complete(&unnamed).await.unwrap();
    assert!(response.content.contains("fn add"));
    assert_eq!(response.usage.total_tokens, 34);
    assert_eq!(response.served_model.as_deref(), Some("deepseek-coder-6.7b"));
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn openai_streaming_decodes_sse_over_http() {
    init_tracing();
    let server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"fn \"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"main\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],",
        "\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"))
        .mount(&server)
        .await;

    let descriptor = ProviderDescriptor::new("oai", BackendKind::OpenAiCompatible, "m")
        .with_base_url(server.uri());
    let provider = Provider::from_descriptor(descriptor).unwrap();

    let stream = provider.complete_streaming(&request("main fn")).await.unwrap();
    let chunks: Vec<_> = stream.map(|c| c.unwrap()).collect().await;

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].text, "fn ");
    assert_eq!(chunks[1].text, "main");
    assert!(chunks[2].is_final);
    let usage = chunks[2].usage.unwrap();
    assert_eq!(usage.prompt_tokens, 9);
    assert_eq!(usage.completion_tokens, 2);
}

#[tokio::test]
async fn manager_streaming_fails_over_before_first_byte() {
    init_tracing();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let b = MockServer::start().await;
    mount_ollama_health(&b).await;
    let ndjson_body = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"ok\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,",
        "\"prompt_eval_count\":4,\"eval_count\":1,\"eval_duration\":50000000}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson_body, "application/x-ndjson"))
        .mount(&b)
        .await;

    let manager = ClientManager::new();
    manager.register(
        Provider::from_descriptor(ollama_descriptor("dead", &dead)).unwrap(),
        true,
    );
    manager.register(
        Provider::from_descriptor(ollama_descriptor("b", &b.uri())).unwrap(),
        false,
    );

    let stream = manager.complete_streaming(&request("hi")).await.unwrap();
    let chunks: Vec<_> = stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "ok");
    assert!(chunks[1].is_final);
    assert_eq!(chunks[1].usage.unwrap().prompt_tokens, 4);
}

#[tokio::test]
async fn llama_cpp_health_props_and_slots() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/props"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "default_generation_settings": {"n_ctx": 16384}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let descriptor = ProviderDescriptor::new("cpp", BackendKind::LlamaCpp, "qwen2.5-coder-7b-q4")
        .with_base_url(server.uri());
    let provider = Provider::from_descriptor(descriptor).unwrap();

    let health = provider.check_health().await;
    assert!(health.reachable);
    assert!(health.model_loaded);
    assert_eq!(health.active_model.as_deref(), Some("qwen2.5-coder-7b-q4"));

    let info = provider.model_info().await;
    assert_eq!(info.context_window_tokens, 16384);
    assert!(info.loaded);

    assert!(provider.ensure_model_loaded("qwen2.5-coder-7b-q4").await.unwrap());
}

#[tokio::test]
async fn llama_cpp_completion_round_trip() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .and(body_partial_json(json!({"n_predict": 8192, "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": "pub fn id<T>(x: T) -> T { x }",
            "tokens_predicted": 13,
            "tokens_evaluated": 42,
            "stopped_eos": true,
            "timings": {"predicted_per_second": 38.7},
        })))
        .mount(&server)
        .await;

    let descriptor =
        ProviderDescriptor::new("cpp", BackendKind::LlamaCpp, "m").with_base_url(server.uri());
    let provider = Provider::from_descriptor(descriptor).unwrap();

    let response = provider.complete(&request("identity fn")).await.unwrap();
    assert!(response.content.contains("pub fn id"));
    assert_eq!(response.usage.prompt_tokens, 42);
    assert_eq!(response.usage.completion_tokens, 13);
    assert_eq!(response.usage.tokens_per_second, Some(38.7));
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn vllm_health_and_model_listing() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "qwen2.5-coder-32b", "max_model_len": 32768}]
        })))
        .mount(&server)
        .await;

    let descriptor = ProviderDescriptor::new("gpu", BackendKind::Vllm, "qwen2.5-coder-32b")
        .with_base_url(server.uri());
    let provider = Provider::from_descriptor(descriptor).unwrap();

    let health = provider.check_health().await;
    assert!(health.is_ready());
    assert_eq!(health.active_model.as_deref(), Some("qwen2.5-coder-32b"));

    let info = provider.model_info().await;
    assert_eq!(info.context_window_tokens, 32768);

    assert!(provider.ensure_model_loaded("QWEN2.5-coder-32b").await.unwrap());
    assert!(!provider.ensure_model_loaded("other-model").await.unwrap());
}

#[tokio::test]
async fn missing_content_field_is_a_protocol_error() {
    init_tracing();
    let server = MockServer::start().await;
    mount_ollama_health(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
        .mount(&server)
        .await;

    let provider =
        Provider::from_descriptor(ollama_descriptor("a", &server.uri())).unwrap();
    let err = provider.complete(&request("hi")).await.unwrap_err();
    assert!(matches!(err, LlmError::Protocol { .. }));
    assert!(err.to_string().contains("message.content"));
}
