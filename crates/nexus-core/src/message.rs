use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a [`Message`] row.
pub type MessageId = Uuid;

/// Opaque identifier for a [`crate::thread::Thread`].
pub type ThreadId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call the assistant declared. `arguments` is always the canonical
/// JSON-string form the LLM APIs require, never a structured value in flight —
/// normalization to this form happens once, at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Message body. Most messages are plain text; assistant/tool messages that
/// carry structured content (tool results, multi-part blocks) use `Blocks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::Blocks(_) => None,
        }
    }

    pub fn char_len(&self) -> usize {
        match self {
            Content::Text(s) => s.chars().count(),
            Content::Blocks(b) => b.iter().map(|v| v.to_string().chars().count()).sum(),
        }
    }
}

/// The atomic log entry (§3 DATA MODEL).
///
/// Invariant upheld by `nexus-compaction`'s pairing validator, not by this
/// type itself: a tool-role message's `tool_call_id` must match some earlier
/// assistant message's declared `tool_calls[].id` in the same thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Persistent repair marker (§4.3). An omitted message is excluded from
    /// prompt construction but never deleted from the store.
    #[serde(default)]
    pub omitted: bool,
    /// Distinguishes messages that count toward the LLM context from
    /// UI-only notices. Mirrors `thread_manager.py`'s `is_llm_message` column.
    #[serde(default = "default_true")]
    pub is_llm_message: bool,
}

fn default_true() -> bool {
    true
}

impl Message {
    pub fn new(thread_id: ThreadId, role: Role, content: Content) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            thread_id,
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            omitted: false,
            is_llm_message: true,
        }
    }

    pub fn user(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self::new(thread_id, Role::User, Content::Text(text.into()))
    }

    pub fn system(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self::new(thread_id, Role::System, Content::Text(text.into()))
    }

    pub fn assistant_text(thread_id: ThreadId, text: impl Into<String>) -> Self {
        Self::new(thread_id, Role::Assistant, Content::Text(text.into()))
    }

    pub fn assistant_with_tool_calls(
        thread_id: ThreadId,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut m = Self::new(thread_id, Role::Assistant, Content::Text(text.into()));
        m.tool_calls = Some(tool_calls);
        m
    }

    pub fn tool_result(thread_id: ThreadId, tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::new(thread_id, Role::Tool, Content::Text(content.into()));
        m.tool_call_id = Some(tool_call_id.into());
        m
    }

    pub fn has_unanswered_calls(&self) -> bool {
        matches!(self.role, Role::Assistant) && self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// A derived, non-persisted atomic unit for compression/trimming (§3).
#[derive(Debug, Clone)]
pub enum MessageGroup {
    Standalone(Message),
    ToolTurn {
        assistant: Message,
        results: Vec<Message>,
    },
}

impl MessageGroup {
    /// Flattens a group back into its constituent messages, in order.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            MessageGroup::Standalone(m) => vec![m],
            MessageGroup::ToolTurn { assistant, results } => {
                let mut out = Vec::with_capacity(1 + results.len());
                out.push(assistant);
                out.extend(results);
                out
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MessageGroup::Standalone(_) => 1,
            MessageGroup::ToolTurn { results, .. } => 1 + results.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Groups a flat message list into [`MessageGroup`]s (§3). An assistant
/// message with `tool_calls` is grouped with every immediately-following
/// tool-result message that answers one of its declared ids; anything else
/// is its own standalone group.
pub fn group_messages(messages: &[Message]) -> Vec<MessageGroup> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let m = &messages[i];
        if m.has_unanswered_calls() {
            let ids: std::collections::HashSet<&str> = m
                .tool_calls
                .as_ref()
                .unwrap()
                .iter()
                .map(|c| c.id.as_str())
                .collect();
            let mut results = Vec::new();
            let mut j = i + 1;
            while j < messages.len() {
                let candidate = &messages[j];
                let matches = matches!(candidate.role, Role::Tool)
                    && candidate
                        .tool_call_id
                        .as_deref()
                        .is_some_and(|id| ids.contains(id));
                if matches {
                    results.push(candidate.clone());
                    j += 1;
                } else {
                    break;
                }
            }
            groups.push(MessageGroup::ToolTurn {
                assistant: m.clone(),
                results,
            });
            i = j;
        } else {
            groups.push(MessageGroup::Standalone(m.clone()));
            i += 1;
        }
    }
    groups
}

pub fn flatten_groups(groups: Vec<MessageGroup>) -> Vec<Message> {
    groups.into_iter().flat_map(MessageGroup::into_messages).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid() -> ThreadId {
        Uuid::new_v4()
    }

    #[test]
    fn groups_standalone_messages() {
        let t = tid();
        let msgs = vec![Message::system(t, "sys"), Message::user(t, "hi")];
        let groups = group_messages(&msgs);
        assert_eq!(groups.len(), 2);
        assert!(matches!(groups[0], MessageGroup::Standalone(_)));
    }

    #[test]
    fn groups_assistant_with_tool_results() {
        let t = tid();
        let call = ToolCall {
            id: "c1".into(),
            name: "list_files".into(),
            arguments: "{}".into(),
        };
        let msgs = vec![
            Message::user(t, "list files"),
            Message::assistant_with_tool_calls(t, "", vec![call]),
            Message::tool_result(t, "c1", "[\"a\", \"b\"]"),
            Message::user(t, "thanks"),
        ];
        let groups = group_messages(&msgs);
        assert_eq!(groups.len(), 3);
        match &groups[1] {
            MessageGroup::ToolTurn { results, .. } => assert_eq!(results.len(), 1),
            _ => panic!("expected tool turn"),
        }
        let flat = flatten_groups(groups);
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn groups_multiple_parallel_tool_calls() {
        let t = tid();
        let calls = vec![
            ToolCall { id: "c1".into(), name: "a".into(), arguments: "{}".into() },
            ToolCall { id: "c2".into(), name: "b".into(), arguments: "{}".into() },
        ];
        let msgs = vec![
            Message::assistant_with_tool_calls(t, "", calls),
            Message::tool_result(t, "c1", "ok"),
            Message::tool_result(t, "c2", "ok"),
        ];
        let groups = group_messages(&msgs);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }
}
