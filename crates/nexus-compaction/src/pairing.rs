use std::collections::HashSet;

use nexus_core::{group_messages, Message, MessageGroup, MessageId, Role};

/// Result of validating the two properties spec.md names: completeness and
/// the answered-calls property. Ordering is enforced structurally by
/// `group_messages` itself — a result that doesn't immediately follow its
/// assistant's tool-call declaration never joins that group, so it shows up
/// here as an orphan rather than as a separate "out of order" case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingValidation {
    pub orphaned_result_ids: Vec<MessageId>,
    pub unanswered_call_ids: Vec<String>,
}

impl PairingValidation {
    pub fn is_clean(&self) -> bool {
        self.orphaned_result_ids.is_empty() && self.unanswered_call_ids.is_empty()
    }
}

pub fn validate(messages: &[Message]) -> PairingValidation {
    let groups = group_messages(messages);
    let mut validation = PairingValidation::default();

    for group in &groups {
        match group {
            MessageGroup::Standalone(m) if m.role == Role::Tool => {
                validation.orphaned_result_ids.push(m.message_id);
            }
            MessageGroup::Standalone(_) => {}
            MessageGroup::ToolTurn { assistant, results } => {
                let answered: HashSet<&str> = results.iter().filter_map(|r| r.tool_call_id.as_deref()).collect();
                for call in assistant.tool_calls.as_ref().unwrap() {
                    if !answered.contains(call.id.as_str()) {
                        validation.unanswered_call_ids.push(call.id.clone());
                    }
                }
            }
        }
    }

    validation
}

/// The outcome of a repair pass: the repaired in-memory list, plus the two
/// kinds of persistent repair the store's mutation surface actually supports
/// (§4.8) — there is no "delete a message" operation, so a dropped assistant
/// message is persisted as "its calls are gone", not as a removed row.
#[derive(Debug, Clone, Default)]
pub struct PairingRepair {
    pub messages: Vec<Message>,
    /// Tool-call ids whose *result* row should be persisted `omitted` —
    /// orphaned results with no declaring assistant message.
    pub omitted_tool_call_ids: Vec<String>,
    /// Call ids to strip from their declaring assistant message's
    /// `tool_calls`, whether the message itself survives repair or not.
    pub removed_call_ids: Vec<String>,
}

/// Repairs completeness/answered/ordering violations (§4.3). Grounded on
/// `context_manager.py`'s `remove_unanswered_tool_calls`, whose branch on a
/// partially-answered assistant message is three-way rather than binary:
/// dropping the whole message only when it has neither surviving tool calls
/// nor other content.
pub fn repair(messages: &[Message]) -> PairingRepair {
    let groups = group_messages(messages);
    let mut out = PairingRepair::default();

    for group in groups {
        match group {
            MessageGroup::Standalone(m) if m.role == Role::Tool => {
                // Orphaned result: no earlier assistant declared this id.
                if let Some(id) = &m.tool_call_id {
                    out.omitted_tool_call_ids.push(id.clone());
                }
            }
            MessageGroup::Standalone(m) => {
                out.messages.push(m);
            }
            MessageGroup::ToolTurn { mut assistant, results } => {
                let declared = assistant.tool_calls.clone().unwrap_or_default();
                let answered: HashSet<String> = results.iter().filter_map(|r| r.tool_call_id.clone()).collect();
                let answered_calls: Vec<_> = declared.iter().filter(|c| answered.contains(&c.id)).cloned().collect();
                let unanswered_ids: Vec<String> =
                    declared.iter().map(|c| c.id.clone()).filter(|id| !answered.contains(id)).collect();

                let has_text = assistant.content.as_text().is_some_and(|t| !t.trim().is_empty());

                if answered_calls.is_empty() && !has_text {
                    // (1) nothing answered, nothing else to keep: drop the
                    // assistant message entirely from the in-memory prompt.
                    // Persisted repair still strips the declared ids so the
                    // row reads clean on the next fetch.
                    out.removed_call_ids.extend(unanswered_ids);
                } else if answered_calls.is_empty() {
                    // (2) nothing answered but there's text: keep the
                    // message, clear its tool_calls.
                    assistant.tool_calls = None;
                    out.messages.push(assistant);
                    out.removed_call_ids.extend(unanswered_ids);
                } else if answered_calls.len() == declared.len() {
                    // Fully answered: no repair needed.
                    out.messages.push(assistant);
                    out.messages.extend(results);
                } else {
                    // (3) partial: keep only the answered calls and their
                    // matching results; the rest are never sent to the LLM.
                    assistant.tool_calls = Some(answered_calls);
                    out.messages.push(assistant);
                    out.messages.extend(results);
                    out.removed_call_ids.extend(unanswered_ids);
                }
            }
        }
    }

    out
}

/// The emergency fallback (§4.3): strip all tool content from the prompt.
/// Triggered only after a retryable `ToolPairing`-class LLM error, capped
/// by the caller at `MAX_ERROR_RETRIES`.
pub fn strip_tool_content(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| m.role != Role::Tool)
        .cloned()
        .map(|mut m| {
            m.tool_calls = None;
            m
        })
        .collect()
}
