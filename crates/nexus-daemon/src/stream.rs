use std::collections::BTreeMap;

use futures::StreamExt;
use nexus_core::{Message, ThreadId, ToolCall};
use nexus_provider::{DeltaStream, InferenceError, StopReason, StreamDelta, Usage};
use nexus_tools::{dispatch, DispatchConfig, ToolCallRequest, ToolRegistry};
use serde_json::{Map, Value};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::{AgentEvent, FinishReason};

/// The agreed-upon marker the LLM is instructed (via system prompt) to emit
/// right after a complete XML tool block, so generation can stop before it
/// drifts into unrelated text (§4.5 supplemented detail). The transport is
/// given this as a stop sequence; the processor only needs to trim it if it
/// slipped through into the accumulated text.
pub const XML_STOP_SEQUENCE: &str = "|||STOP_AGENT|||";

const DEFAULT_XML_TOOL_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Whether to additionally scan accumulated text for the XML calling
    /// convention, for models with no native tool-calling support (§4.5).
    pub xml_tool_calling: bool,
    /// A single turn declaring more XML tool calls than this is treated as
    /// a runaway generation and terminates the run (§4.6's
    /// `xml_tool_limit_reached`).
    pub xml_tool_limit: usize,
    /// Tool names that end the run outright once dispatched, regardless of
    /// what else the turn produced (§4.6's `agent_terminated`) — e.g. a
    /// "finish"/"ask_user" tool with no further continuation.
    pub terminal_tools: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            xml_tool_calling: false,
            xml_tool_limit: DEFAULT_XML_TOOL_LIMIT,
            terminal_tools: Vec::new(),
        }
    }
}

/// What one LLM stream, plus its resulting tool dispatch, produced.
pub struct ProcessedTurn {
    pub assistant: Message,
    pub tool_results: Vec<Message>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

pub enum StreamEnd {
    Finished(ProcessedTurn),
    /// The run was cancelled mid-stream (§4.7, property 7): nothing beyond
    /// the partial text is persisted, and the caller must not auto-continue.
    Cancelled { partial_text: String, usage_so_far: Usage },
}

#[derive(Default)]
struct NativeCall {
    id: String,
    name: String,
    arguments: String,
}

/// Drains one LLM stream, assembling text and tool calls, dispatching the
/// latter, and returning the fully-formed turn (§4.5). Checked for
/// cancellation between every delta, per §4.7's cancellation checkpoints.
pub async fn process_stream(
    thread_id: ThreadId,
    mut stream: DeltaStream,
    registry: &ToolRegistry,
    dispatch_config: &DispatchConfig,
    config: &StreamConfig,
    cancel: &CancellationToken,
    events: &Sender<AgentEvent>,
) -> Result<StreamEnd, InferenceError> {
    let mut text = String::new();
    let mut native_calls: BTreeMap<usize, NativeCall> = BTreeMap::new();
    let mut completed_native: Vec<usize> = Vec::new();
    let mut usage = Usage::default();
    let mut stop_reason = StopReason::EndTurn;

    while let Some(delta) = stream.next().await {
        if cancel.is_cancelled() {
            return Ok(StreamEnd::Cancelled { partial_text: text, usage_so_far: usage });
        }

        match delta? {
            StreamDelta::TextDelta(chunk) => {
                text.push_str(&chunk);
                let _ = events.send(AgentEvent::Content(chunk)).await;
            }
            StreamDelta::ToolCallStart { index, id, name } => {
                native_calls.insert(index, NativeCall { id, name, arguments: String::new() });
            }
            StreamDelta::ToolCallArgumentDelta { index, partial_json } => {
                if let Some(call) = native_calls.get_mut(&index) {
                    call.arguments.push_str(&partial_json);
                }
            }
            StreamDelta::ToolCallComplete { index } => {
                completed_native.push(index);
            }
            StreamDelta::Usage(delta_usage) => {
                usage.input_tokens += delta_usage.input_tokens;
                usage.output_tokens += delta_usage.output_tokens;
                usage.cache_read_tokens += delta_usage.cache_read_tokens;
                usage.cache_creation_tokens += delta_usage.cache_creation_tokens;
            }
            StreamDelta::Finish(reason) => {
                stop_reason = reason;
            }
        }
    }

    if let Some(marker_at) = text.find(XML_STOP_SEQUENCE) {
        text.truncate(marker_at);
    }

    let mut calls: Vec<ToolCall> = completed_native
        .into_iter()
        .filter_map(|idx| native_calls.remove(&idx))
        .map(|c| ToolCall {
            id: c.id,
            name: c.name,
            arguments: if c.arguments.is_empty() { "{}".into() } else { c.arguments },
        })
        .collect();

    let mut xml_limit_reached = false;
    if config.xml_tool_calling {
        let xml_calls = extract_xml_tool_calls(&text);
        if xml_calls.len() > config.xml_tool_limit {
            xml_limit_reached = true;
        }
        for (i, parsed) in xml_calls.into_iter().enumerate() {
            calls.push(ToolCall {
                id: format!("xml-{i}"),
                name: parsed.name,
                arguments: parsed.arguments,
            });
        }
        text = strip_xml_tool_blocks(&text);
    }

    let dispatch_requests: Vec<ToolCallRequest> = calls
        .iter()
        .map(|c| ToolCallRequest { id: c.id.clone(), name: c.name.clone(), arguments: c.arguments.clone() })
        .collect();

    let mut terminated_by_tool = false;
    let tool_results = if dispatch_requests.is_empty() {
        Vec::new()
    } else {
        let outcomes = dispatch(registry, &dispatch_requests, cancel, dispatch_config).await;
        let mut messages = Vec::with_capacity(outcomes.len());
        for (call, outcome) in dispatch_requests.iter().zip(outcomes.iter()) {
            if config.terminal_tools.iter().any(|t| t == &call.name) {
                terminated_by_tool = true;
            }
            let _ = events
                .send(AgentEvent::Tool {
                    tool_call_id: outcome.tool_call_id.clone(),
                    name: call.name.clone(),
                    result: outcome.content(),
                    is_error: outcome.is_error(),
                })
                .await;
            messages.push(Message::tool_result(thread_id, outcome.tool_call_id.clone(), outcome.content()));
        }
        messages
    };

    let finish_reason = if terminated_by_tool {
        FinishReason::AgentTerminated
    } else if xml_limit_reached {
        FinishReason::XmlToolLimitReached
    } else if !calls.is_empty() {
        FinishReason::ToolCalls
    } else if stop_reason == StopReason::MaxTokens {
        FinishReason::Length
    } else {
        FinishReason::Stop
    };

    let assistant = if calls.is_empty() {
        Message::assistant_text(thread_id, text)
    } else {
        Message::assistant_with_tool_calls(thread_id, text, calls)
    };

    debug!(?finish_reason, tool_calls = assistant.tool_calls.as_ref().map(Vec::len).unwrap_or(0), "stream processed");

    Ok(StreamEnd::Finished(ProcessedTurn { assistant, tool_results, finish_reason, usage }))
}

struct ParsedXmlCall {
    name: String,
    arguments: String,
}

/// Scans the complete buffer for `<tool name="...">...</tool>` blocks, each
/// containing zero or more `<arg name="...">value</arg>` children. This
/// runs once the stream has ended rather than incrementally on every
/// delta — streaming UX would want incremental scanning, but dispatch
/// correctness only needs the final buffer, and that keeps this parser a
/// plain function instead of a piece of carried-across-deltas state.
fn extract_xml_tool_calls(text: &str) -> Vec<ParsedXmlCall> {
    let mut calls = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("<tool ") {
        let after_start = &rest[start..];
        let Some(tag_end) = after_start.find('>') else { break };
        let open_tag = &after_start[..tag_end];
        let name = extract_attr(open_tag, "name").unwrap_or_default();
        let Some(close_rel) = after_start.find("</tool>") else { break };
        let body = &after_start[tag_end + 1..close_rel];
        let arguments = extract_xml_args(body);
        calls.push(ParsedXmlCall { name, arguments });
        rest = &after_start[close_rel + "</tool>".len()..];
    }
    calls
}

fn strip_xml_tool_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find("<tool ") {
            Some(start) => {
                out.push_str(&rest[..start]);
                match rest[start..].find("</tool>") {
                    Some(close_rel) => {
                        rest = &rest[start + close_rel + "</tool>".len()..];
                    }
                    None => {
                        rest = "";
                        break;
                    }
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out.trim().to_string()
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')?;
    Some(tag[start..start + end].to_string())
}

fn extract_xml_args(body: &str) -> String {
    let mut map = Map::new();
    let mut rest = body;
    while let Some(start) = rest.find("<arg ") {
        let after = &rest[start..];
        let Some(tag_end) = after.find('>') else { break };
        let open_tag = &after[..tag_end];
        let key = extract_attr(open_tag, "name").unwrap_or_default();
        let Some(close_rel) = after.find("</arg>") else { break };
        let value = after[tag_end + 1..close_rel].trim().to_string();
        map.insert(key, Value::String(value));
        rest = &after[close_rel + "</arg>".len()..];
    }
    serde_json::to_string(&Value::Object(map)).unwrap_or_else(|_| "{}".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_tool_call_with_args() {
        let text = r#"thinking... <tool name="read_file"><arg name="path">a.txt</arg></tool> done"#;
        let calls = extract_xml_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert!(calls[0].arguments.contains("a.txt"));
    }

    #[test]
    fn extracts_multiple_tool_calls_in_order() {
        let text = r#"<tool name="a"></tool> middle <tool name="b"><arg name="x">1</arg></tool>"#;
        let calls = extract_xml_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn strip_removes_tool_blocks_but_keeps_surrounding_text() {
        let text = r#"before <tool name="a"><arg name="x">1</arg></tool> after"#;
        let stripped = strip_xml_tool_blocks(text);
        assert_eq!(stripped, "before  after".trim());
    }

    #[test]
    fn no_tool_tags_leaves_text_untouched() {
        let text = "just plain prose, no calls here";
        assert!(extract_xml_tool_calls(text).is_empty());
        assert_eq!(strip_xml_tool_blocks(text), text);
    }
}
