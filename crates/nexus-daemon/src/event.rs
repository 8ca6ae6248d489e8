use serde::{Deserialize, Serialize};

/// The terminal-state vocabulary the Auto-Continue Controller (C6) reasons
/// over (§4.6). A strict superset of the transport's `StopReason`: the last
/// two variants are agent-level decisions no raw transport ever emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    AgentTerminated,
    XmlToolLimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Stopped,
    Error,
    Warning,
}

/// The emitted event stream (§6 EXTERNAL INTERFACES). This is the whole
/// public surface a caller of [`crate::orchestrator::ThreadOrchestrator`]
/// observes; there is no wire protocol here, just these values over a
/// channel — framing them onto a transport (SSE, a WebSocket, …) is a
/// surrounding system's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    /// Incremental assistant text, in the order the LLM produced it.
    Content(String),
    /// One tool call's result, persisted and ready to show the user.
    Tool {
        tool_call_id: String,
        name: String,
        result: String,
        is_error: bool,
    },
    Status {
        state: RunState,
        finish_reason: Option<FinishReason>,
    },
    Error {
        message: String,
    },
}
