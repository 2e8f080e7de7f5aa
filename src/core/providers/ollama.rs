//! Ollama adapter: `/api/chat`, `/api/tags`, `/api/show`, `/api/pull`.
//!
//! Streaming replies are newline-delimited JSON objects carrying
//! `message.content` fragments and a `done` flag with eval counters on the
//! final object.

use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{DEFAULT_CONTEXT_WINDOW_TOKENS, Provider, http};
use crate::core::error::{LlmError, Result};
use crate::core::streaming::{ChunkDecoder, StreamFraming, TokenStream};
use crate::core::types::{
    ChatRequest, ChatResponse, ModelDescriptor, ProviderHealth, ResponseFormat, Usage,
    parse_parameter_size,
};

pub(super) async fn complete(provider: &Provider, request: &ChatRequest) -> Result<ChatResponse> {
    let started = Instant::now();
    let url = format!("{}/api/chat", provider.endpoint());
    let payload = chat_payload(provider, request, false);
    let builder = provider
        .apply_request_timeout(provider.http().post(&url).json(&payload), request);
    let root = http::send_json(provider.id(), builder, provider.deadline_secs(request)).await?;

    let content = root
        .pointer("/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            LlmError::protocol(
                provider.id(),
                format!(
                    "reply is missing message.content: {}",
                    http::payload_excerpt(&root)
                ),
            )
        })?
        .to_string();

    let prompt_tokens = http::read_u32(&root, "prompt_eval_count");
    let completion_tokens = http::read_u32(&root, "eval_count");
    let eval_ns = http::read_u64(&root, "eval_duration");
    let tokens_per_second =
        (eval_ns > 0).then(|| completion_tokens as f64 / (eval_ns as f64 / 1e9));

    let total_ns = http::read_u64(&root, "total_duration");
    let duration = if total_ns > 0 {
        Duration::from_nanos(total_ns)
    } else {
        started.elapsed()
    };

    let finish_reason = root
        .get("done_reason")
        .and_then(Value::as_str)
        .unwrap_or("stop")
        .to_string();

    Ok(ChatResponse {
        content,
        usage: Usage::new(prompt_tokens, completion_tokens, tokens_per_second),
        duration,
        finish_reason: Some(finish_reason),
        served_model: Some(provider.effective_model(request).to_string()),
    })
}

pub(super) async fn stream(provider: &Provider, request: &ChatRequest) -> Result<TokenStream> {
    let url = format!("{}/api/chat", provider.endpoint());
    let payload = chat_payload(provider, request, true);
    let builder = provider
        .apply_request_timeout(provider.http().post(&url).json(&payload), request);
    let bytes =
        http::open_byte_stream(provider.id(), builder, provider.deadline_secs(request)).await?;
    Ok(ChunkDecoder::new(provider.id(), StreamFraming::JsonLines, bytes).into_stream())
}

/// Root ping plus model-tag listing; the model counts as loaded when a tag
/// matches the configured model by name prefix.
pub(super) async fn health(provider: &Provider) -> ProviderHealth {
    let ping_url = format!("{}/", provider.endpoint());
    let reachable = match provider
        .http()
        .get(&ping_url)
        .timeout(provider.probe_timeout())
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(error) => {
            warn!(provider = %provider.id(), %error, "health ping failed");
            false
        }
    };
    if !reachable {
        return ProviderHealth::unreachable();
    }

    let mut model_loaded = false;
    let mut active_model = None;
    let tags_url = format!("{}/api/tags", provider.endpoint());
    match provider
        .http()
        .get(&tags_url)
        .timeout(provider.probe_timeout())
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            if let Ok(body) = response.json::<Value>().await {
                let wanted = provider.default_model().to_ascii_lowercase();
                for model in body
                    .get("models")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    let Some(name) = model.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    if name.to_ascii_lowercase().starts_with(&wanted) {
                        model_loaded = true;
                        active_model = Some(name.to_string());
                        break;
                    }
                }
            }
        }
        Ok(_) => {}
        Err(error) => warn!(provider = %provider.id(), %error, "tag listing failed"),
    }

    ProviderHealth {
        reachable: true,
        model_loaded,
        active_model,
        ..Default::default()
    }
}

/// `/api/show`: context window out of the `parameters` blob, quantization and
/// parameter size out of `details`.
pub(super) async fn model_info(provider: &Provider) -> ModelDescriptor {
    let model = provider.default_model().to_string();
    let url = format!("{}/api/show", provider.endpoint());
    let response = provider
        .http()
        .post(&url)
        .json(&json!({"model": model}))
        .timeout(provider.probe_timeout())
        .send()
        .await;

    let root = match response {
        Ok(response) if response.status().is_success() => {
            match response.json::<Value>().await {
                Ok(root) => root,
                Err(error) => {
                    warn!(provider = %provider.id(), %error, "unreadable /api/show reply");
                    return ModelDescriptor::fallback(model, provider.effective_context_window());
                }
            }
        }
        Ok(response) => {
            warn!(provider = %provider.id(), status = %response.status(), "/api/show rejected");
            return ModelDescriptor::fallback(model, provider.effective_context_window());
        }
        Err(error) => {
            warn!(provider = %provider.id(), %error, "/api/show failed");
            return ModelDescriptor::fallback(model, provider.effective_context_window());
        }
    };

    let mut context_window = DEFAULT_CONTEXT_WINDOW_TOKENS;
    if let Some(parameters) = root.get("parameters").and_then(Value::as_str) {
        for line in parameters.lines() {
            let trimmed = line.trim();
            if !trimmed.to_ascii_lowercase().starts_with("num_ctx") {
                continue;
            }
            if let Some(ctx) = trimmed
                .split_whitespace()
                .next_back()
                .and_then(|v| v.parse().ok())
            {
                context_window = ctx;
            }
        }
    }
    // A configured override always wins over what the backend reports.
    let context_window = provider
        .descriptor()
        .context_window
        .unwrap_or(context_window);

    let quantization = root
        .pointer("/details/quantization_level")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let parameter_count = root
        .pointer("/details/parameter_size")
        .and_then(Value::as_str)
        .map(parse_parameter_size)
        .unwrap_or(0);

    ModelDescriptor {
        model_id: model,
        context_window_tokens: context_window,
        quantization,
        parameter_count,
        vram_usage_mb: 0,
        loaded: true,
    }
}

/// Pull the model through `/api/pull`; a success status means the model is
/// available locally.
pub(super) async fn ensure_model_loaded(provider: &Provider, model: &str) -> Result<bool> {
    let url = format!("{}/api/pull", provider.endpoint());
    let response = provider
        .http()
        .post(&url)
        .json(&json!({"model": model, "stream": false}))
        .send()
        .await
        .map_err(|e| http::map_send_error(provider.id(), e, provider.descriptor().timeout_secs))?;
    http::check_status(provider.id(), response).await?;
    info!(provider = %provider.id(), model, "model pulled");
    Ok(true)
}

/// The `/api/chat` payload: sampling knobs nest under `options`.
fn chat_payload(provider: &Provider, request: &ChatRequest, stream: bool) -> Value {
    let mut options = json!({
        "temperature": request.temperature,
        "top_p": request.top_p,
        "num_predict": request.max_output_tokens,
    });
    if let Some(penalty) = request.repetition_penalty {
        options["repeat_penalty"] = json!(penalty);
    }
    if !request.stop_sequences.is_empty() {
        options["stop"] = json!(request.stop_sequences);
    }

    let mut payload = json!({
        "model": provider.effective_model(request),
        "messages": request.messages,
        "stream": stream,
        "options": options,
    });
    if request.response_format == ResponseFormat::Json {
        payload["format"] = json!("json");
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderDescriptor;
    use crate::core::providers::BackendKind;
    use crate::core::types::ChatMessage;

    fn provider() -> Provider {
        let descriptor = ProviderDescriptor::new("local", BackendKind::Ollama, "codellama:7b")
            .with_base_url("http://127.0.0.1:11434");
        Provider::from_descriptor(descriptor).unwrap()
    }

    #[test]
    fn test_chat_payload_maps_sampling_options() {
        let mut request = ChatRequest::new("qwen2.5-coder", vec![ChatMessage::user("hi")]);
        request.repetition_penalty = Some(1.1);
        request.stop_sequences = vec!["```".to_string()];

        let payload = chat_payload(&provider(), &request, false);

        assert_eq!(payload["model"], "qwen2.5-coder");
        assert_eq!(payload["stream"], false);
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["options"]["num_predict"], 8192);
        assert_eq!(payload["options"]["repeat_penalty"], 1.1f32);
        assert_eq!(payload["options"]["stop"][0], "```");
        assert!(payload.get("format").is_none());
    }

    #[test]
    fn test_chat_payload_json_format_flag() {
        let mut request = ChatRequest::new("", vec![ChatMessage::user("hi")]);
        request.response_format = ResponseFormat::Json;

        let payload = chat_payload(&provider(), &request, true);

        assert_eq!(payload["model"], "codellama:7b");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["format"], "json");
        assert!(payload["options"].get("repeat_penalty").is_none());
        assert!(payload["options"].get("stop").is_none());
    }
}
