//! Shared HTTP plumbing for the backend adapters.

use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use crate::core::error::{LlmError, Result};
use crate::core::streaming::ByteStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Build the pooled per-provider client. The request timeout set here is the
/// provider default; individual calls may override it per request.
pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|e| LlmError::configuration(format!("failed to build HTTP client: {e}")))
}

/// Resolve a bearer token from the environment variable named in the
/// descriptor, when configured and non-empty.
pub(crate) fn bearer_token(api_key_env: Option<&str>) -> Option<String> {
    api_key_env
        .and_then(|name| std::env::var(name).ok())
        .filter(|key| !key.is_empty())
}

/// Attach bearer authorization when an API key reference is configured.
pub(crate) fn authorize(builder: RequestBuilder, api_key_env: Option<&str>) -> RequestBuilder {
    match bearer_token(api_key_env) {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// Map a reqwest send failure onto the taxonomy: an elapsed deadline is a
/// timeout, everything else transport.
pub(crate) fn map_send_error(provider: &str, error: reqwest::Error, deadline_secs: u64) -> LlmError {
    if error.is_timeout() {
        LlmError::timeout(provider, deadline_secs)
    } else {
        LlmError::transport(provider, error.to_string())
    }
}

/// Reject non-success statuses with a body excerpt for context.
pub(crate) async fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    Err(LlmError::transport(
        provider,
        format!("HTTP {status}: {excerpt}"),
    ))
}

/// Send a request and parse the reply body as JSON.
pub(crate) async fn send_json(
    provider: &str,
    request: RequestBuilder,
    deadline_secs: u64,
) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| map_send_error(provider, e, deadline_secs))?;
    let response = check_status(provider, response).await?;
    response
        .json()
        .await
        .map_err(|e| LlmError::protocol(provider, format!("reply is not valid JSON: {e}")))
}

/// Send a request and hand back the raw body byte stream.
pub(crate) async fn open_byte_stream(
    provider: &str,
    request: RequestBuilder,
    deadline_secs: u64,
) -> Result<ByteStream> {
    let response = request
        .send()
        .await
        .map_err(|e| map_send_error(provider, e, deadline_secs))?;
    let response = check_status(provider, response).await?;
    Ok(Box::pin(response.bytes_stream()))
}

/// Read an integer field with a zero default.
pub(crate) fn read_u32(value: &Value, key: &str) -> u32 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Read a wide integer field with a zero default.
pub(crate) fn read_u64(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Excerpt of a JSON value for protocol-error context.
pub(crate) fn payload_excerpt(value: &Value) -> String {
    let rendered = value.to_string();
    rendered.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_requires_non_empty_value() {
        // SAFETY: test-local variable names, no concurrent readers.
        unsafe {
            std::env::set_var("LLMUX_TEST_KEY", "secret");
            std::env::set_var("LLMUX_TEST_KEY_EMPTY", "");
        }
        assert_eq!(bearer_token(Some("LLMUX_TEST_KEY")).as_deref(), Some("secret"));
        assert_eq!(bearer_token(Some("LLMUX_TEST_KEY_EMPTY")), None);
        assert_eq!(bearer_token(Some("LLMUX_TEST_KEY_UNSET")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn test_read_helpers_default_to_zero() {
        let value = serde_json::json!({"count": 7, "wrong_type": "x"});
        assert_eq!(read_u32(&value, "count"), 7);
        assert_eq!(read_u32(&value, "missing"), 0);
        assert_eq!(read_u32(&value, "wrong_type"), 0);
        assert_eq!(read_u64(&value, "count"), 7);
    }
}
