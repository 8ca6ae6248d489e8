use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::registry::ToolRegistry;

/// Default per-call timeout when neither the dispatcher config nor the
/// tool's own descriptor overrides it (§4.5, §5).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub default_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// One declared tool call from an assistant turn, already unified across
/// the native and XML calling conventions (§4.5) by the stream processor.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Ok(String),
    UnknownTool,
    Timeout,
    Error(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    /// Renders the outcome as the string payload a tool-result message
    /// carries back to the LLM. Failure modes are structured, never a bare
    /// panic-style message, so the model can recover within the turn.
    pub fn content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Ok(s) => s.clone(),
            ToolOutcome::UnknownTool => {
                serde_json::json!({"error": "unknown tool", "tool_call_id": self.tool_call_id}).to_string()
            }
            ToolOutcome::Timeout => serde_json::json!({"error": "tool call timed out"}).to_string(),
            ToolOutcome::Error(e) => serde_json::json!({"error": e}).to_string(),
            ToolOutcome::Cancelled => serde_json::json!({"error": "cancelled"}).to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self.outcome, ToolOutcome::Ok(_))
    }
}

/// Dispatches every call declared in one assistant turn (§4.5). Tool calls
/// run concurrently only when *every* call in the turn is registry-marked
/// parallel-safe; otherwise the whole batch runs sequentially in declared
/// order, since a mixed batch might depend on ordering between an unsafe
/// call and its neighbor. Either way, the returned results are ordered to
/// match `calls`, regardless of completion order, so the persisted
/// tool-role messages always line up with the assistant's declared list.
pub async fn dispatch(
    registry: &ToolRegistry,
    calls: &[ToolCallRequest],
    cancel: &CancellationToken,
    config: &DispatchConfig,
) -> Vec<ToolResult> {
    let all_parallel_safe = !calls.is_empty() && calls.iter().all(|c| registry.is_parallel_safe(&c.name));

    if all_parallel_safe {
        let futures = calls.iter().map(|call| dispatch_one(registry, call, cancel, config));
        futures::future::join_all(futures).await
    } else {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(dispatch_one(registry, call, cancel, config).await);
        }
        results
    }
}

async fn dispatch_one(
    registry: &ToolRegistry,
    call: &ToolCallRequest,
    cancel: &CancellationToken,
    config: &DispatchConfig,
) -> ToolResult {
    if cancel.is_cancelled() {
        return ToolResult { tool_call_id: call.id.clone(), outcome: ToolOutcome::Cancelled };
    }

    let Some(executor) = registry.resolve(&call.name) else {
        warn!(tool = %call.name, "dispatch: unknown tool");
        return ToolResult { tool_call_id: call.id.clone(), outcome: ToolOutcome::UnknownTool };
    };

    let arguments: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
    let timeout = registry
        .timeout_override_secs(&call.name)
        .map(Duration::from_secs)
        .unwrap_or(config.default_timeout);

    let child = cancel.child_token();
    let outcome = match tokio::time::timeout(timeout, executor.invoke(&arguments, child)).await {
        Ok(Ok(result)) => ToolOutcome::Ok(result),
        Ok(Err(message)) => ToolOutcome::Error(message),
        Err(_) => {
            warn!(tool = %call.name, ?timeout, "dispatch: tool call timed out");
            ToolOutcome::Timeout
        }
    };

    ToolResult { tool_call_id: call.id.clone(), outcome }
}
