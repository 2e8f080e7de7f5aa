//! vLLM adapter: OpenAI-compatible chat completions plus vLLM's dedicated
//! `/health` endpoint and `/v1/models` metadata. Unlike the generic adapter,
//! the repetition penalty passes through under its native name.

use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, warn};

use super::{Provider, http};
use crate::core::error::{LlmError, Result};
use crate::core::streaming::{ChunkDecoder, StreamFraming, TokenStream};
use crate::core::types::{ChatRequest, ChatResponse, ModelDescriptor, ProviderHealth, Usage};

/// vLLM serves large-context models; assume more room than the generic
/// default when nothing is configured.
const VLLM_DEFAULT_CONTEXT_WINDOW: u32 = 8192;

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

    let duration = started.elapsed();
    let usage = parse_usage(&root, duration.as_secs_f64());
    debug!(
        provider = %provider.id(),
        model = %served_model,
        elapsed_ms = duration.as_millis() as u64,
        "vLLM completion finished"
    );

    Ok(ChatResponse {
        content,
        usage,
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

/// `/health` for reachability, `/v1/models` for load state.
pub(super) async fn health(provider: &Provider) -> ProviderHealth {
    let health_url = format!("{}/health", provider.endpoint());
    let reachable = match provider
        .http()
        .get(&health_url)
        .timeout(provider.probe_timeout())
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(error) => {
            warn!(provider = %provider.id(), %error, "health endpoint failed");
            false
        }
    };
    if !reachable {
        return ProviderHealth::unreachable();
    }

    let mut model_loaded = false;
    let mut active_model = None;
    match models_request(provider).send().await {
        Ok(response) if response.status().is_success() => {
            if let Ok(body) = response.json::<Value>().await {
                if let Some(id) = body.pointer("/data/0/id").and_then(Value::as_str) {
                    active_model = Some(id.to_string());
                    model_loaded = true;
                }
            }
        }
        Ok(_) => {}
        Err(error) => warn!(provider = %provider.id(), %error, "model listing failed"),
    }

    ProviderHealth {
        reachable: true,
        model_loaded,
        active_model,
        ..Default::default()
    }
}

/// `/v1/models` metadata: `max_model_len` is the context window unless the
/// descriptor overrides it.
pub(super) async fn model_info(provider: &Provider) -> ModelDescriptor {
    let default_window = provider
        .descriptor()
        .context_window
        .unwrap_or(VLLM_DEFAULT_CONTEXT_WINDOW);
    let fallback = ModelDescriptor::fallback(provider.default_model(), default_window);

    let response = match models_request(provider).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!(provider = %provider.id(), status = %response.status(), "/v1/models rejected");
            return fallback;
        }
        Err(error) => {
            warn!(provider = %provider.id(), %error, "/v1/models failed");
            return fallback;
        }
    };
    let Ok(body) = response.json::<Value>().await else {
        return fallback;
    };
    let Some(model) = body.pointer("/data/0") else {
        warn!(provider = %provider.id(), "/v1/models returned no entries");
        return fallback;
    };

    let model_id = model
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(provider.default_model())
        .to_string();
    let context_window = match provider.descriptor().context_window {
        Some(window) => window,
        None => model
            .get("max_model_len")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(VLLM_DEFAULT_CONTEXT_WINDOW),
    };
    let quantization = model
        .get("quantization")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    ModelDescriptor {
        model_id,
        context_window_tokens: context_window,
        quantization,
        parameter_count: http::read_u64(model, "parameter_count"),
        vram_usage_mb: http::read_u64(model, "vram_usage_mb"),
        loaded: true,
    }
}

/// vLLM cannot pull models; verify the requested one is being served.
pub(super) async fn ensure_model_loaded(provider: &Provider, model: &str) -> Result<bool> {
    let response = models_request(provider)
        .send()
        .await
        .map_err(|e| {
            http::map_send_error(provider.id(), e, provider.descriptor().health_timeout_secs)
        })?;
    let response = http::check_status(provider.id(), response).await?;
    let body: Value = response
        .json()
        .await
        .map_err(|e| LlmError::protocol(provider.id(), format!("reply is not valid JSON: {e}")))?;

    let listed = body
        .get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("id").and_then(Value::as_str))
        .any(|id| id.eq_ignore_ascii_case(model));
    if !listed {
        warn!(provider = %provider.id(), model, "model is not served by this vLLM instance");
    }
    Ok(listed)
}

fn models_request(provider: &Provider) -> reqwest::RequestBuilder {
    let url = format!("{}/v1/models", provider.endpoint());
    http::authorize(
        provider.http().get(&url),
        provider.descriptor().api_key_env.as_deref(),
    )
    .timeout(provider.probe_timeout())
}

fn chat_request(
    provider: &Provider,
    request: &ChatRequest,
    stream: bool,
) -> reqwest::RequestBuilder {
    let url = format!("{}/v1/chat/completions", provider.endpoint());
    let body = chat_body(provider, request, stream);
    let builder = http::authorize(
        provider.http().post(&url),
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
        body["repetition_penalty"] = json!(penalty);
    }
    body
}

fn parse_usage(root: &Value, elapsed_secs: f64) -> Usage {
    let Some(usage) = root.get("usage") else {
        return Usage::empty();
    };
    let prompt_tokens = http::read_u32(usage, "prompt_tokens");
    let completion_tokens = http::read_u32(usage, "completion_tokens");
    let tokens_per_second = (elapsed_secs > 0.0 && completion_tokens > 0)
        .then(|| ((completion_tokens as f64 / elapsed_secs) * 100.0).round() / 100.0);
    Usage::new(prompt_tokens, completion_tokens, tokens_per_second)
}
