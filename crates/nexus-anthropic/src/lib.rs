//! Streaming Anthropic Messages API transport.
//!
//! Grounded on the teacher's `src/inference/anthropic.rs` — the richer of
//! its two duplicate `AnthropicProvider`s, the one with `ThinkingConfig`
//! and interleaved-thinking header support — generalized from a single-shot
//! `infer()` into a `stream()` that parses the API's SSE event sequence
//! incrementally instead of waiting for the whole body.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use nexus_provider::{
    classify, DeltaStream, InferenceError, InferenceProvider, InferenceRequest, StopReason,
    StreamDelta, ToolChoice, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const INTERLEAVED_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn build_body(request: &InferenceRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
        });

        if let Some(system) = &request.system {
            // Anthropic accepts `system` as either a bare string or an
            // array of content blocks; the array form is required once any
            // block carries `cache_control`, so always send it that way —
            // a single uncached block degrades to the same request a bare
            // string would have produced.
            body["system"] = json!(system);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        } else {
            body["max_tokens"] = json!(4096);
        }
        if request.temperature > 0.0 {
            body["temperature"] = json!(request.temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
            body["tool_choice"] = match request.tool_choice {
                ToolChoice::Auto => json!({"type": "auto"}),
                ToolChoice::Required => json!({"type": "any"}),
                ToolChoice::None => Value::Null,
            };
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
        }
        if let Some(thinking) = &request.thinking {
            body["thinking"] = json!({"type": "enabled", "budget_tokens": thinking.budget_tokens});
        }

        body
    }
}

#[async_trait]
impl InferenceProvider for AnthropicProvider {
    async fn stream(&self, request: InferenceRequest) -> Result<DeltaStream, InferenceError> {
        let has_thinking = request.thinking.is_some();
        let has_tools = !request.tools.is_empty();
        let body = Self::build_body(&request);

        debug!(model = %request.model, messages = request.messages.len(), "anthropic stream request");

        let mut req = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");

        if has_thinking && has_tools {
            req = req.header("anthropic-beta", INTERLEAVED_THINKING_BETA);
        }

        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify(status, &text));
        }

        let byte_stream = resp.bytes_stream().map(|r| r.map_err(|e| e.to_string()));
        Ok(parse_sse(byte_stream))
    }
}

/// Parses the Anthropic SSE event sequence into [`StreamDelta`]s, carrying
/// a small amount of state (active content-block index, line buffer)
/// across chunks. `content_block_start` for a `tool_use` block emits
/// `ToolCallStart`; `input_json_delta` deltas on that block emit
/// `ToolCallArgumentDelta`; `content_block_stop` emits `ToolCallComplete`
/// unconditionally (harmless for text blocks — the stream processor only
/// acts on it for blocks it opened as tool calls).
fn parse_sse(
    byte_stream: impl futures::Stream<Item = Result<Bytes, String>> + Send + 'static,
) -> DeltaStream {
    struct State<S> {
        inner: S,
        buf: String,
        done: bool,
    }

    let state = State {
        inner: Box::pin(byte_stream),
        buf: String::new(),
        done: false,
    };

    let stream = stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(event) = take_event(&mut state.buf) {
                if let Some(delta) = event_to_deltas(&event) {
                    return Some((delta, state));
                }
                continue;
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    state.buf.push_str(&String::from_utf8_lossy(&bytes));
                }
                Some(Err(e)) => {
                    return Some((Err(InferenceError::Request(e)), state));
                }
                None => {
                    state.done = true;
                }
            }
        }
    });

    // Each raw SSE event can map to zero, one, or two deltas (e.g. a
    // `message_delta` carries both usage and finish reason); flatten.
    stream
        .flat_map(|item: Result<Vec<StreamDelta>, InferenceError>| match item {
            Ok(deltas) => stream::iter(deltas.into_iter().map(Ok)).boxed(),
            Err(e) => stream::iter(vec![Err(e)]).boxed(),
        })
        .boxed()
}

/// Pulls one complete `data: {...}` SSE event out of the buffer, if one is
/// fully present (terminated by a blank line), leaving any remainder.
fn take_event(buf: &mut String) -> Option<Value> {
    let idx = buf.find("\n\n")?;
    let raw_event: String = buf.drain(..idx + 2).collect();
    for line in raw_event.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            return serde_json::from_str(data).ok();
        }
    }
    None
}

fn event_to_deltas(event: &Value) -> Option<Result<Vec<StreamDelta>, InferenceError>> {
    let event_type = event.get("type")?.as_str()?;
    let deltas = match event_type {
        "message_start" => {
            let input_tokens = event["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            let cache_read = event["message"]["usage"]["cache_read_input_tokens"]
                .as_u64()
                .unwrap_or(0) as u32;
            let cache_creation = event["message"]["usage"]["cache_creation_input_tokens"]
                .as_u64()
                .unwrap_or(0) as u32;
            vec![StreamDelta::Usage(Usage {
                input_tokens,
                output_tokens: 0,
                cache_read_tokens: cache_read,
                cache_creation_tokens: cache_creation,
            })]
        }
        "content_block_start" => {
            let index = event["index"].as_u64()? as usize;
            let block = &event["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                vec![StreamDelta::ToolCallStart {
                    index,
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                }]
            } else {
                return None;
            }
        }
        "content_block_delta" => {
            let index = event["index"].as_u64()? as usize;
            let delta = &event["delta"];
            match delta["type"].as_str()? {
                "text_delta" => vec![StreamDelta::TextDelta(
                    delta["text"].as_str().unwrap_or_default().to_string(),
                )],
                "input_json_delta" => vec![StreamDelta::ToolCallArgumentDelta {
                    index,
                    partial_json: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                }],
                _ => return None,
            }
        }
        "content_block_stop" => {
            let index = event["index"].as_u64()? as usize;
            vec![StreamDelta::ToolCallComplete { index }]
        }
        "message_delta" => {
            let mut out = Vec::new();
            let output_tokens = event["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
            out.push(StreamDelta::Usage(Usage {
                input_tokens: 0,
                output_tokens,
                cache_read_tokens: 0,
                cache_creation_tokens: 0,
            }));
            if let Some(stop_reason) = event["delta"]["stop_reason"].as_str() {
                let reason = match stop_reason {
                    "tool_use" => StopReason::ToolUse,
                    "max_tokens" => StopReason::MaxTokens,
                    _ => StopReason::EndTurn,
                };
                out.push(StreamDelta::Finish(reason));
            }
            out
        }
        _ => return None,
    };
    Some(Ok(deltas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn sse(events: &[&str]) -> impl futures::Stream<Item = Result<Bytes, String>> {
        let chunk = events
            .iter()
            .map(|e| format!("data: {e}\n\n"))
            .collect::<String>();
        stream::iter(vec![Ok(Bytes::from(chunk))])
    }

    #[tokio::test]
    async fn parses_text_delta_sequence() {
        let events = [
            r#"{"type":"message_start","message":{"usage":{"input_tokens":10}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi!"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
        ];
        let deltas: Vec<_> = parse_sse(sse(&events)).collect().await;
        let texts: Vec<_> = deltas
            .iter()
            .filter_map(|d| match d {
                Ok(StreamDelta::TextDelta(t)) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hi!".to_string()]);
        assert!(deltas
            .iter()
            .any(|d| matches!(d, Ok(StreamDelta::Finish(StopReason::EndTurn)))));
    }

    #[tokio::test]
    async fn parses_tool_use_block() {
        let events = [
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"c1","name":"list_files"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"path\""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":":\"/\"}"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":5}}"#,
        ];
        let deltas: Vec<_> = parse_sse(sse(&events)).collect().await;
        assert!(deltas
            .iter()
            .any(|d| matches!(d, Ok(StreamDelta::ToolCallStart { id, name, .. }) if id == "c1" && name == "list_files")));
        let arg_fragments: String = deltas
            .iter()
            .filter_map(|d| match d {
                Ok(StreamDelta::ToolCallArgumentDelta { partial_json, .. }) => Some(partial_json.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(arg_fragments, r#"{"path":"/"}"#);
        assert!(deltas
            .iter()
            .any(|d| matches!(d, Ok(StreamDelta::Finish(StopReason::ToolUse)))));
    }

    #[test]
    fn body_includes_thinking_and_tools() {
        let mut req = InferenceRequest::new("claude-sonnet-4-20250514", vec![json!({"role": "user", "content": "hi"})]);
        req.thinking = Some(nexus_provider::ThinkingConfig { budget_tokens: 1024 });
        req.tools = vec![json!({"name": "x", "input_schema": {}})];
        let body = AnthropicProvider::build_body(&req);
        assert_eq!(body["thinking"]["budget_tokens"], 1024);
        assert_eq!(body["tools"][0]["name"], "x");
    }

    #[test]
    fn body_sends_system_as_a_cache_marked_block_array() {
        let mut req = InferenceRequest::new("claude-sonnet-4-20250514", vec![json!({"role": "user", "content": "hi"})]);
        req.system = Some(vec![json!({"type": "text", "text": "be helpful", "cache_control": {"type": "ephemeral"}})]);
        let body = AnthropicProvider::build_body(&req);
        assert!(body["system"].is_array());
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
    }
}
