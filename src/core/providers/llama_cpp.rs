//! llama.cpp server adapter: `/completion`, `/health`, `/props`, `/slots`.
//!
//! The server has no chat endpoint, so conversations are rendered into a
//! ChatML prompt and `<|im_end|>` is always among the stop sequences.

use serde_json::{Value, json};
use std::time::Instant;
use tracing::warn;

use super::{DEFAULT_CONTEXT_WINDOW_TOKENS, Provider, http};
use crate::core::error::{LlmError, Result};
use crate::core::streaming::{ChunkDecoder, StreamFraming, TokenStream};
use crate::core::types::{
    ChatMessage, ChatRequest, ChatResponse, ModelDescriptor, ProviderHealth, Usage,
};

const CHATML_END: &str = "<|im_end|>";

pub(super) async fn complete(provider: &Provider, request: &ChatRequest) -> Result<ChatResponse> {
    let started = Instant::now();
    let url = format!("{}/completion", provider.endpoint());
    let body = completion_body(request, false);
    let builder = provider
        .apply_request_timeout(provider.http().post(&url).json(&body), request);
    let root = http::send_json(provider.id(), builder, provider.deadline_secs(request)).await?;

    let content = root
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            LlmError::protocol(
                provider.id(),
                format!("reply is missing content: {}", http::payload_excerpt(&root)),
            )
        })?
        .to_string();

    let completion_tokens = http::read_u32(&root, "tokens_predicted");
    let prompt_tokens = http::read_u32(&root, "tokens_evaluated");
    let tokens_per_second = root
        .pointer("/timings/predicted_per_second")
        .and_then(Value::as_f64);

    let finish_reason = root
        .get("stop_type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if root.get("stopped_eos").and_then(Value::as_bool) == Some(true) {
                "stop".to_string()
            } else {
                "length".to_string()
            }
        });

    Ok(ChatResponse {
        content,
        usage: Usage::new(prompt_tokens, completion_tokens, tokens_per_second),
        duration: started.elapsed(),
        finish_reason: Some(finish_reason),
        served_model: Some(provider.default_model().to_string()),
    })
}

pub(super) async fn stream(provider: &Provider, request: &ChatRequest) -> Result<TokenStream> {
    let url = format!("{}/completion", provider.endpoint());
    let body = completion_body(request, true);
    let builder = provider
        .apply_request_timeout(provider.http().post(&url).json(&body), request);
    let bytes =
        http::open_byte_stream(provider.id(), builder, provider.deadline_secs(request)).await?;
    Ok(ChunkDecoder::new(provider.id(), StreamFraming::Sse, bytes).into_stream())
}

/// `/health` answers `{"status":"ok"}` once the model is loaded.
pub(super) async fn health(provider: &Provider) -> ProviderHealth {
    let url = format!("{}/health", provider.endpoint());
    let response = match provider
        .http()
        .get(&url)
        .timeout(provider.probe_timeout())
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            warn!(provider = %provider.id(), %error, "health endpoint failed");
            return ProviderHealth::unreachable();
        }
    };
    if !response.status().is_success() {
        return ProviderHealth::unreachable();
    }

    let loaded = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body.get("status").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|status| status.eq_ignore_ascii_case("ok"));

    ProviderHealth {
        reachable: true,
        model_loaded: loaded,
        active_model: loaded.then(|| provider.default_model().to_string()),
        ..Default::default()
    }
}

/// `/props` carries the serving context size; `/slots` answering at all
/// confirms a loaded model.
pub(super) async fn model_info(provider: &Provider) -> ModelDescriptor {
    let mut context_window = DEFAULT_CONTEXT_WINDOW_TOKENS;
    match provider
        .http()
        .get(format!("{}/props", provider.endpoint()))
        .timeout(provider.probe_timeout())
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            if let Ok(body) = response.json::<Value>().await {
                if let Some(n_ctx) = body
                    .pointer("/default_generation_settings/n_ctx")
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                {
                    context_window = n_ctx;
                }
            }
        }
        Ok(response) => {
            warn!(provider = %provider.id(), status = %response.status(), "/props rejected")
        }
        Err(error) => warn!(provider = %provider.id(), %error, "/props failed"),
    }
    let context_window = provider
        .descriptor()
        .context_window
        .unwrap_or(context_window);

    let loaded = match provider
        .http()
        .get(format!("{}/slots", provider.endpoint()))
        .timeout(provider.probe_timeout())
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(error) => {
            warn!(provider = %provider.id(), %error, "/slots failed");
            false
        }
    };

    ModelDescriptor {
        model_id: provider.default_model().to_string(),
        context_window_tokens: context_window,
        quantization: "unknown".to_string(),
        parameter_count: 0,
        vram_usage_mb: 0,
        loaded,
    }
}

/// llama.cpp loads its model at startup; confirm readiness through health.
pub(super) async fn ensure_model_loaded(provider: &Provider) -> Result<bool> {
    Ok(health(provider).await.is_ready())
}

/// Render the conversation as a ChatML prompt with a trailing assistant
/// primer.
pub(crate) fn format_chat_ml(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(message.role.as_str());
        prompt.push('\n');
        prompt.push_str(&message.content);
        prompt.push_str(CHATML_END);
        prompt.push('\n');
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn completion_body(request: &ChatRequest, stream: bool) -> Value {
    let mut stop = vec![CHATML_END.to_string()];
    stop.extend(request.stop_sequences.iter().cloned());

    let mut body = json!({
        "prompt": format_chat_ml(&request.messages),
        "n_predict": request.max_output_tokens,
        "temperature": request.temperature,
        "top_p": request.top_p,
        "stream": stream,
        "stop": stop,
    });
    if let Some(penalty) = request.repetition_penalty {
        body["repeat_penalty"] = json!(penalty);
    }
    body
}
