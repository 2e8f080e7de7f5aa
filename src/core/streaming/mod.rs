//! Streaming response decoder.
//!
//! Normalizes the event-stream encodings spoken by the supported backends —
//! SSE (`data: <json>` frames terminated by `[DONE]`) and newline-delimited
//! JSON with a completion flag — into one canonical sequence of
//! [`TokenChunk`]s. The decoder is a pull-based [`Stream`]: it buffers at
//! most one partial line, never the whole response, and the sequence it
//! produces is finite, strictly ordered, and ends exactly once with a final
//! chunk carrying usage.

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::warn;

use crate::core::error::{LlmError, Result};
use crate::core::types::{TokenChunk, Usage};

/// Raw byte stream from a backend response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Decoded token-chunk stream handed to callers.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<TokenChunk>> + Send>>;

/// SSE data-line prefix.
const DATA_PREFIX: &str = "data:";

/// End-of-stream sentinel, with or without the data prefix.
const DONE_SENTINEL: &str = "[DONE]";

/// Line framing used by the backend's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFraming {
    /// `data: <json>` frames separated by blank lines, `[DONE]`-terminated
    Sse,
    /// One bare JSON object per line with a `done`/`stop` flag
    JsonLines,
}

/// Decodes a backend byte stream into canonical token chunks.
///
/// Single-traversal and non-restartable: once the sentinel, a final frame, or
/// EOF is seen, the sequence terminates. Dropping the decoder aborts the
/// underlying transfer and releases the connection.
pub struct ChunkDecoder {
    provider: String,
    framing: StreamFraming,
    inner: ByteStream,
    line_buf: String,
    ready: VecDeque<TokenChunk>,
    /// Completion-token fallback counter for backends that report no usage
    fragments: u32,
    emitted_final: bool,
    terminated: bool,
}

impl ChunkDecoder {
    /// Wrap a raw byte stream.
    pub fn new(provider: impl Into<String>, framing: StreamFraming, inner: ByteStream) -> Self {
        Self {
            provider: provider.into(),
            framing,
            inner,
            line_buf: String::new(),
            ready: VecDeque::new(),
            fragments: 0,
            emitted_final: false,
            terminated: false,
        }
    }

    /// Box the decoder into the canonical stream type.
    pub fn into_stream(self) -> TokenStream {
        Box::pin(self)
    }

    /// Append bytes to the line buffer and process every complete line.
    fn feed(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        self.line_buf.push_str(&text);

        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            if self.terminated {
                continue;
            }
            self.process_line(line.trim_end_matches(['\n', '\r']));
        }
    }

    fn process_line(&mut self, line: &str) {
        // Frames are blank-line separated; comment lines start with ':'.
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        if self.is_sentinel(line) {
            self.finish(None);
            return;
        }

        let payload = match self.framing {
            StreamFraming::Sse => match line.strip_prefix(DATA_PREFIX) {
                Some(rest) => rest.trim_start(),
                // Not a data frame (event/id/retry fields); nothing to emit.
                None => return,
            },
            StreamFraming::JsonLines => line,
        };
        if payload.trim() == DONE_SENTINEL {
            self.finish(None);
            return;
        }

        let frame: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(error) => {
                warn!(
                    provider = %self.provider,
                    %error,
                    payload = %truncate(payload, 200),
                    "skipping malformed stream line"
                );
                return;
            }
        };

        let text = extract_text(&frame);
        if is_final_frame(&frame) {
            if !text.is_empty() {
                self.fragments += 1;
            }
            let usage = self.extract_usage(&frame);
            self.finish(Some(TokenChunk::terminal(text, usage)));
        } else if !text.is_empty() {
            self.fragments += 1;
            self.ready.push_back(TokenChunk::fragment(text));
        }
        // Frames with no text and no finality are dropped.
    }

    /// Terminate the sequence. When no final chunk was produced yet and the
    /// caller did not supply one, a synthetic final chunk with accumulated
    /// usage keeps the ends-exactly-once invariant.
    fn finish(&mut self, terminal: Option<TokenChunk>) {
        if !self.emitted_final {
            let chunk = terminal
                .unwrap_or_else(|| TokenChunk::terminal("", Usage::new(0, self.fragments, None)));
            self.ready.push_back(chunk);
            self.emitted_final = true;
        }
        self.terminated = true;
    }

    fn is_sentinel(&self, line: &str) -> bool {
        let trimmed = line.trim();
        trimmed == DONE_SENTINEL || trimmed == "data: [DONE]"
    }

    /// Usage from a final frame, falling back to locally counted fragments.
    fn extract_usage(&self, frame: &Value) -> Usage {
        let throughput = extract_throughput(frame);

        // OpenAI-style usage object.
        if let Some(usage) = frame.get("usage") {
            let prompt = read_u32(usage, "prompt_tokens");
            let completion = read_u32(usage, "completion_tokens");
            return Usage::new(prompt, completion, throughput);
        }

        // Ollama eval counters.
        if frame.get("eval_count").is_some() || frame.get("prompt_eval_count").is_some() {
            let prompt = read_u32(frame, "prompt_eval_count");
            let completion = read_u32(frame, "eval_count");
            return Usage::new(prompt, completion, throughput);
        }

        // llama.cpp predicted/evaluated counters.
        if frame.get("tokens_predicted").is_some() || frame.get("tokens_evaluated").is_some() {
            let prompt = read_u32(frame, "tokens_evaluated");
            let completion = read_u32(frame, "tokens_predicted");
            return Usage::new(prompt, completion, throughput);
        }

        Usage::new(0, self.fragments, throughput)
    }
}

impl Stream for ChunkDecoder {
    type Item = Result<TokenChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(chunk) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(chunk)));
            }
            if this.terminated {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.feed(&bytes),
                Poll::Ready(Some(Err(error))) => {
                    // A transport failure ends the sequence through the error
                    // channel, never as a fake chunk.
                    this.terminated = true;
                    return Poll::Ready(Some(Err(LlmError::transport(
                        &this.provider,
                        format!("stream read failed: {error}"),
                    ))));
                }
                Poll::Ready(None) => {
                    // EOF with a partial trailing line: process it before
                    // deciding how to terminate.
                    if !this.line_buf.is_empty() {
                        let tail = std::mem::take(&mut this.line_buf);
                        this.process_line(tail.trim_end_matches('\r'));
                    }
                    if !this.terminated {
                        this.finish(None);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Extract generated text from a frame using the known shapes, first match
/// wins: chat delta, chat message, plain content, nested token text.
fn extract_text(frame: &Value) -> String {
    if let Some(delta) = frame
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        return delta.to_string();
    }
    if let Some(content) = frame.pointer("/message/content").and_then(Value::as_str) {
        return content.to_string();
    }
    if let Some(content) = frame.get("content").and_then(Value::as_str) {
        return content.to_string();
    }
    if let Some(token) = frame.get("token") {
        if let Some(text) = token.get("text").and_then(Value::as_str) {
            return text.to_string();
        }
        if let Some(text) = token.as_str() {
            return text.to_string();
        }
    }
    String::new()
}

/// A frame is final when it carries a non-null finish reason or an explicit
/// completion boolean.
fn is_final_frame(frame: &Value) -> bool {
    if frame
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
        .is_some()
    {
        return true;
    }
    ["done", "finished", "stop"]
        .iter()
        .any(|flag| frame.get(*flag).and_then(Value::as_bool) == Some(true))
}

/// Tokens-per-second from whichever timing field the backend reports.
fn extract_throughput(frame: &Value) -> Option<f64> {
    if let Some(tps) = frame.get("tokens_per_second").and_then(Value::as_f64) {
        return Some(tps);
    }
    if let Some(tps) = frame
        .pointer("/timings/predicted_per_second")
        .and_then(Value::as_f64)
    {
        return Some(tps);
    }
    let eval_ns = frame.get("eval_duration").and_then(Value::as_u64)?;
    if eval_ns == 0 {
        return None;
    }
    let completion = read_u32(frame, "eval_count");
    Some(completion as f64 / (eval_ns as f64 / 1_000_000_000.0))
}

fn read_u32(value: &Value, key: &str) -> u32 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
