use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Native tool-choice policy, mirrored from the original `ToolChoice`
/// literal type (`thread_manager.py`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
}

/// Extended-thinking configuration, carried over from the teacher's
/// `inference/anthropic.rs` (the richer of its two duplicate providers,
/// promoted per SPEC_FULL.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    pub budget_tokens: u32,
}

/// A fully-assembled request: already-compressed, already-cache-marked
/// messages (`nexus-compaction`'s job), ready to hand to a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    /// System prompt as a list of blocks rather than a bare string, so a
    /// `cache_control` marker (§4.4) has somewhere to attach — mirrors how
    /// `messages` content is block-structured once any part of it is marked.
    /// Each block is `{"type": "text", "text": ..., "cache_control"?: ...}`.
    pub system: Option<Vec<Value>>,
    /// Wire-shaped message blocks, as produced by the prompt assembler
    /// (C4). Kept as `Value` at this boundary since each provider maps
    /// them into its own request shape.
    pub messages: Vec<Value>,
    #[serde(default)]
    pub tools: Vec<Value>,
    pub tool_choice: ToolChoice,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    pub thinking: Option<ThinkingConfig>,
}

impl InferenceRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Value>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            max_tokens: None,
            temperature: 0.0,
            stop_sequences: Vec::new(),
            thinking: None,
        }
    }
}

/// The transport-level stop reason (§4.5's native subset; the full
/// `finish_reason` vocabulary including `agent_terminated` and
/// `xml_tool_limit_reached` is layered on top by the stream processor,
/// since those two are agent-level decisions no raw transport emits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
}

/// One incremental update from a streaming transport (§6 EXTERNAL
/// INTERFACES). `index` identifies which tool-call slot a fragment
/// belongs to when the provider interleaves multiple calls in one stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamDelta {
    TextDelta(String),
    ToolCallStart { index: usize, id: String, name: String },
    ToolCallArgumentDelta { index: usize, partial_json: String },
    ToolCallComplete { index: usize },
    Usage(Usage),
    Finish(StopReason),
}
