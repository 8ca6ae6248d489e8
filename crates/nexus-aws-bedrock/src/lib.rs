//! Streaming AWS Bedrock Converse API transport.
//!
//! Grounded on the same teacher shape as `nexus-anthropic` (one
//! `InferenceProvider` impl per wire format) but talking to the typed
//! `aws-sdk-bedrockruntime` client instead of a raw HTTP/SSE connection —
//! the SDK already turns the converse-stream event sequence into a Rust
//! enum, so there is no hand-rolled framing here, only translation into
//! this repo's provider-neutral `StreamDelta` vocabulary.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::types::{
    CachePointBlock, CachePointType, ContentBlock, ContentBlockDelta, ContentBlockStart,
    ConversationRole, ConverseStreamOutput, Message as BedrockMessage,
    StopReason as BedrockStopReason, SystemContentBlock,
};
use aws_sdk_bedrockruntime::Client;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::debug;

use nexus_provider::{
    DeltaStream, InferenceError, InferenceProvider, InferenceRequest, StopReason, StreamDelta,
    Usage,
};

pub struct BedrockProvider {
    client: Client,
}

impl BedrockProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config))
    }
}

/// Builds a Converse API cache-point block (§4.4, §4.1 Bedrock-family
/// note): a standalone block placed immediately after the content it
/// applies to, since Bedrock has no per-block `cache_control` field the
/// way Anthropic does.
fn cache_point_block() -> Result<ContentBlock, InferenceError> {
    let block = CachePointBlock::builder()
        .cache_point_type(CachePointType::Default)
        .build()
        .map_err(|e| InferenceError::Request(e.to_string()))?;
    Ok(ContentBlock::CachePoint(block))
}

fn system_cache_point_block() -> Result<SystemContentBlock, InferenceError> {
    let block = CachePointBlock::builder()
        .cache_point_type(CachePointType::Default)
        .build()
        .map_err(|e| InferenceError::Request(e.to_string()))?;
    Ok(SystemContentBlock::CachePoint(block))
}

/// Converts one provider-neutral wire message (produced by the prompt
/// assembler, C4) into a typed Bedrock `Message`. Only the subset of
/// content this repo's assembler ever emits — text and tool-use/tool-result
/// blocks, optionally `cache_control`-marked — needs handling; anything
/// else is a malformed request.
fn json_to_message(value: &Value) -> Result<BedrockMessage, InferenceError> {
    let role = match value["role"].as_str() {
        Some("user") | Some("tool") => ConversationRole::User,
        Some("assistant") => ConversationRole::Assistant,
        other => {
            return Err(InferenceError::Request(format!(
                "unsupported message role for bedrock converse: {other:?}"
            )))
        }
    };

    let mut blocks = Vec::new();
    match &value["content"] {
        Value::String(text) => blocks.push(ContentBlock::Text(text.clone())),
        Value::Array(parts) => {
            for part in parts {
                match part["type"].as_str() {
                    Some("text") => {
                        if let Some(text) = part["text"].as_str() {
                            blocks.push(ContentBlock::Text(text.to_string()));
                        }
                        if part.get("cache_control").is_some() {
                            blocks.push(cache_point_block()?);
                        }
                    }
                    _ => {
                        return Err(InferenceError::Request(
                            "unsupported content block for bedrock converse".to_string(),
                        ))
                    }
                }
            }
        }
        _ => {
            return Err(InferenceError::Request(
                "message content must be a string or array of blocks".to_string(),
            ))
        }
    }

    BedrockMessage::builder()
        .role(role)
        .set_content(Some(blocks))
        .build()
        .map_err(|e| InferenceError::Request(e.to_string()))
}

/// Converts the assembled system blocks (§4.4) into Converse API system
/// content, carrying a cache point into its own block the same way
/// [`json_to_message`] does for message content.
fn system_to_blocks(system: &[Value]) -> Result<Vec<SystemContentBlock>, InferenceError> {
    let mut blocks = Vec::with_capacity(system.len());
    for part in system {
        if let Some(text) = part["text"].as_str() {
            blocks.push(SystemContentBlock::Text(text.to_string()));
        }
        if part.get("cache_control").is_some() {
            blocks.push(system_cache_point_block()?);
        }
    }
    Ok(blocks)
}

#[async_trait]
impl InferenceProvider for BedrockProvider {
    async fn stream(&self, request: InferenceRequest) -> Result<DeltaStream, InferenceError> {
        debug!(model = %request.model, "bedrock converse stream request");

        let messages = request
            .messages
            .iter()
            .map(json_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut call = self
            .client
            .converse_stream()
            .model_id(&request.model)
            .set_messages(Some(messages));

        if let Some(system) = &request.system {
            for block in system_to_blocks(system)? {
                call = call.system(block);
            }
        }

        let output = call
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;

        let mut receiver = output.stream;
        let deltas = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(Some(event)) => {
                        if let Some(delta) = event_to_delta(&event) {
                            return Some((delta, receiver));
                        }
                        continue;
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        return Some((Err(InferenceError::Transient(e.to_string())), receiver))
                    }
                }
            }
        });

        Ok(deltas.boxed())
    }
}

fn event_to_delta(event: &ConverseStreamOutput) -> Option<Result<StreamDelta, InferenceError>> {
    match event {
        ConverseStreamOutput::ContentBlockStart(ev) => match ev.start() {
            Some(ContentBlockStart::ToolUse(tool_use)) => Some(Ok(StreamDelta::ToolCallStart {
                index: ev.content_block_index() as usize,
                id: tool_use.tool_use_id().to_string(),
                name: tool_use.name().to_string(),
            })),
            _ => None,
        },
        ConverseStreamOutput::ContentBlockDelta(ev) => match ev.delta() {
            Some(ContentBlockDelta::Text(text)) => {
                Some(Ok(StreamDelta::TextDelta(text.clone())))
            }
            Some(ContentBlockDelta::ToolUse(tool_use)) => {
                Some(Ok(StreamDelta::ToolCallArgumentDelta {
                    index: ev.content_block_index() as usize,
                    partial_json: tool_use.input().to_string(),
                }))
            }
            _ => None,
        },
        ConverseStreamOutput::ContentBlockStop(ev) => Some(Ok(StreamDelta::ToolCallComplete {
            index: ev.content_block_index() as usize,
        })),
        ConverseStreamOutput::MessageStop(ev) => {
            let reason = match ev.stop_reason() {
                BedrockStopReason::ToolUse => StopReason::ToolUse,
                BedrockStopReason::MaxTokens => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            };
            Some(Ok(StreamDelta::Finish(reason)))
        }
        ConverseStreamOutput::Metadata(ev) => ev.usage().map(|usage| {
            Ok(StreamDelta::Usage(Usage {
                input_tokens: usage.input_tokens().max(0) as u32,
                output_tokens: usage.output_tokens().max(0) as u32,
                cache_read_tokens: usage.cache_read_input_tokens().unwrap_or(0).max(0) as u32,
                cache_creation_tokens: usage.cache_write_input_tokens().unwrap_or(0).max(0) as u32,
            }))
        }),
        _ => None,
    }
}

/// Bedrock surfaces throttling/overload as typed SDK error variants rather
/// than a string body; lacking a structured match here (the SDK's error
/// enum is sealed against exhaustive matching across its service-error
/// wrapper), this falls back to the same substring classifier nexus-provider
/// uses for providers with no structured signal.
fn classify_sdk_error(message: &str) -> InferenceError {
    nexus_provider::classify(0, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_plain_text_user_message() {
        let value = json!({"role": "user", "content": "hello"});
        let message = json_to_message(&value).unwrap();
        assert_eq!(message.role(), &ConversationRole::User);
    }

    #[test]
    fn rejects_unsupported_role() {
        let value = json!({"role": "system", "content": "hi"});
        assert!(json_to_message(&value).is_err());
    }

    #[test]
    fn cache_control_becomes_a_cache_point_block() {
        let value = json!({
            "role": "user",
            "content": [{"type": "text", "text": "hello", "cache_control": {"type": "ephemeral"}}],
        });
        let message = json_to_message(&value).unwrap();
        assert_eq!(message.content().len(), 2);
        assert!(matches!(message.content()[0], ContentBlock::Text(_)));
        assert!(matches!(message.content()[1], ContentBlock::CachePoint(_)));
    }

    #[test]
    fn system_blocks_carry_cache_point_when_marked() {
        let system = vec![json!({"type": "text", "text": "be helpful", "cache_control": {"type": "ephemeral"}})];
        let blocks = system_to_blocks(&system).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[0], SystemContentBlock::Text(_)));
        assert!(matches!(blocks[1], SystemContentBlock::CachePoint(_)));
    }

    #[test]
    fn classifies_overloaded_sdk_message_as_overload() {
        let e = classify_sdk_error("ThrottlingException: rate exceeded, overloaded");
        assert!(matches!(e, InferenceError::Overload(_)));
    }
}
