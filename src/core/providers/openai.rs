//! Generic OpenAI-compatible adapter for TGI, LocalAI, LM Studio, and
//! similar backends exposing `/v1/chat/completions`.
//!
//! Streaming uses SSE completion-chunk frames terminated by `data: [DONE]`;
//! `stream_options.include_usage` asks compliant servers to attach usage to
//! the final frame. There is no dedicated health endpoint, so the probe is a
//! 1-token completion.

use serde_json::{Value, json};
use std::time::Instant;
use tracing::warn;

use super::{Provider, http};
use crate::core::error::{LlmError, Result};
use crate::core::streaming::{ChunkDecoder, StreamFraming, TokenStream};
use crate::core::types::{
    ChatRequest, ChatResponse, ModelDescriptor, ProviderHealth, ResponseFormat, Usage,
};

pub(super) async fn complete(provider: &Provider, request: &ChatRequest) -> Result<ChatResponse> {
    let started = Instant::now();
    let builder = chat_request(provider, request, false);
    let root = http::send_json(provider.id(), builder, provider.deadline_secs(request)).await?;

    let content = root
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            LlmError::protocol(
                provider.id(),
                format!(
                    "reply is missing choices[0].message.content: {}",
                    http::payload_excerpt(&root)
                ),
            )
        })?
        .to_string();

    let finish_reason = root
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    let served_model = root
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(provider.effective_model(request))
        .to_string();

    let usage = root.get("usage");
    let prompt_tokens = usage.map(|u| http::read_u32(u, "prompt_tokens")).unwrap_or(0);
    let completion_tokens = usage
        .map(|u| http::read_u32(u, "completion_tokens"))
        .unwrap_or(0);

    let duration = started.elapsed();
    let tokens_per_second = (completion_tokens > 0 && duration.as_secs_f64() > 0.0)
        .then(|| completion_tokens as f64 / duration.as_secs_f64());

    Ok(ChatResponse {
        content,
        usage: Usage::new(prompt_tokens, completion_tokens, tokens_per_second),
        duration,
        finish_reason,
        served_model: Some(served_model),
    })
}

pub(super) async fn stream(provider: &Provider, request: &ChatRequest) -> Result<TokenStream> {
    let builder = chat_request(provider, request, true);
    let bytes =
        http::open_byte_stream(provider.id(), builder, provider.deadline_secs(request)).await?;
    Ok(ChunkDecoder::new(provider.id(), StreamFraming::Sse, bytes).into_stream())
}

/// No dedicated endpoint: a minimal 1-token completion proves both
/// reachability and model readiness in one round trip.
pub(super) async fn health(provider: &Provider) -> ProviderHealth {
    let body = json!({
        "model": provider.default_model(),
        "messages": [{"role": "user", "content": "hi"}],
        "max_tokens": 1,
        "temperature": 0.0,
    });
    let builder = http::authorize(
        provider.http().post(chat_completions_url(provider)),
        provider.descriptor().api_key_env.as_deref(),
    )
    .json(&body)
    .timeout(provider.probe_timeout());

    match builder.send().await {
        Ok(response) if response.status().is_success() => {
            let active_model = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("model").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| provider.default_model().to_string());
            ProviderHealth {
                reachable: true,
                model_loaded: true,
                active_model: Some(active_model),
                ..Default::default()
            }
        }
        Ok(response) => {
            warn!(provider = %provider.id(), status = %response.status(), "health probe rejected");
            ProviderHealth::unreachable()
        }
        Err(error) => {
            warn!(provider = %provider.id(), %error, "health probe failed");
            ProviderHealth::unreachable()
        }
    }
}

/// `/v1/models` discovery with config fallbacks.
pub(super) async fn model_info(provider: &Provider) -> ModelDescriptor {
    let mut info = ModelDescriptor::fallback(
        provider.default_model(),
        provider.effective_context_window(),
    );
    let url = format!("{}/v1/models", provider.endpoint());
    let builder = http::authorize(
        provider.http().get(&url),
        provider.descriptor().api_key_env.as_deref(),
    )
    .timeout(provider.probe_timeout());

    match builder.send().await {
        Ok(response) if response.status().is_success() => {
            if let Ok(body) = response.json::<Value>().await {
                if let Some(first) = body.pointer("/data/0") {
                    if let Some(id) = first.get("id").and_then(Value::as_str) {
                        info.model_id = id.to_string();
                    }
                    info.loaded = true;
                }
            }
        }
        Ok(response) => {
            warn!(provider = %provider.id(), status = %response.status(), "/v1/models rejected")
        }
        Err(error) => warn!(provider = %provider.id(), %error, "/v1/models failed"),
    }
    info
}

/// No pull support; a healthy, loaded backend is as good as it gets.
pub(super) async fn ensure_model_loaded(provider: &Provider) -> Result<bool> {
    Ok(health(provider).await.is_ready())
}

fn chat_completions_url(provider: &Provider) -> String {
    format!("{}/v1/chat/completions", provider.endpoint())
}

fn chat_request(
    provider: &Provider,
    request: &ChatRequest,
    stream: bool,
) -> reqwest::RequestBuilder {
    let body = chat_body(provider, request, stream);
    let builder = http::authorize(
        provider.http().post(chat_completions_url(provider)),
        provider.descriptor().api_key_env.as_deref(),
    )
    .json(&body);
    provider.apply_request_timeout(builder, request)
}

fn chat_body(provider: &Provider, request: &ChatRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": provider.effective_model(request),
        "messages": request.messages,
        "temperature": request.temperature,
        "max_tokens": request.max_output_tokens,
        "top_p": request.top_p,
        "stream": stream,
    });
    if !request.stop_sequences.is_empty() {
        body["stop"] = json!(request.stop_sequences);
    }
    if let Some(penalty) = request.repetition_penalty {
        body["frequency_penalty"] = json!(penalty);
    }
    if request.response_format == ResponseFormat::Json {
        body["response_format"] = json!({"type": "json_object"});
    }
    if stream {
        body["stream_options"] = json!({"include_usage": true});
    }
    body
}
