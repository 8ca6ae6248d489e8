use nexus_core::{group_messages, Content, Message, MessageGroup, ModelDescriptor, Role};

use crate::pairing;
use crate::wire::MessageCounter;

/// Tuning knobs for the tiered strategy (§4.2). Defaults mirror
/// `context_manager.py`'s constants.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub recent_tool_results_kept: usize,
    pub recent_user_messages_kept: usize,
    pub recent_assistant_messages_kept: usize,
    pub truncate_chars: usize,
    pub min_groups_to_keep: usize,
    /// Message-count budget for tier 6 (§4.2), not a group count — converted
    /// to a group target via the history's average group size.
    pub middle_out_max_groups: usize,
    pub max_iterations: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            recent_tool_results_kept: 5,
            recent_user_messages_kept: 10,
            recent_assistant_messages_kept: 10,
            truncate_chars: 3000,
            min_groups_to_keep: 5,
            middle_out_max_groups: 320,
            max_iterations: 2,
        }
    }
}

const TRUNCATION_MARKER: &str = "\n...[truncated]...";

/// `compress(messages, model, system?, actual_total?) -> messages'` (§4.2).
/// Runs the tiered strategy, recounting after each tier, stopping as soon as
/// the target is met. Always re-validates pairing afterward (§4.3) since a
/// tier that drops a tool-result message could otherwise leave an assistant
/// message's call unanswered.
pub fn compress(
    messages: Vec<Message>,
    model: &ModelDescriptor,
    counter: &dyn MessageCounter,
    system: Option<&str>,
    config: &CompressionConfig,
) -> Vec<Message> {
    let max_tokens = model.max_tokens();
    let target = (max_tokens as f64 * 0.6) as u32;

    let current = counter.count(&model.id, &messages, system);
    if current <= max_tokens {
        return messages;
    }

    let result = compress_to_target(messages, &model.id, counter, system, target, config, config.max_iterations);
    let repaired = pairing::repair(&result);
    repaired.messages
}

fn compress_to_target(
    messages: Vec<Message>,
    model_id: &str,
    counter: &dyn MessageCounter,
    system: Option<&str>,
    target: u32,
    config: &CompressionConfig,
    iterations_left: u32,
) -> Vec<Message> {
    let mut current = messages;
    let truncate_len = config.truncate_chars;

    // Tier 1: tool-output compression.
    current = compress_tool_outputs(current, config.recent_tool_results_kept, truncate_len);
    if counter.count(model_id, &current, system) <= target {
        return current;
    }

    // Tier 2: user-message compression.
    current = compress_role_text(current, Role::User, config.recent_user_messages_kept, truncate_len);
    if counter.count(model_id, &current, system) <= target {
        return current;
    }

    // Tier 3: assistant-message compression.
    current = compress_role_text(current, Role::Assistant, config.recent_assistant_messages_kept, truncate_len);
    if counter.count(model_id, &current, system) <= target {
        return current;
    }

    // Tier 4: secondary aggressive pass — tiers 1-3 again at half the
    // per-message truncation length.
    let aggressive_len = (truncate_len / 2).max(20);
    current = compress_tool_outputs(current, config.recent_tool_results_kept, aggressive_len);
    current = compress_role_text(current, Role::User, config.recent_user_messages_kept, aggressive_len);
    current = compress_role_text(current, Role::Assistant, config.recent_assistant_messages_kept, aggressive_len);
    if counter.count(model_id, &current, system) <= target {
        return current;
    }

    // Tier 5: group-level omission, removing from the middle first.
    current = omit_middle_groups(current, config.min_groups_to_keep, |msgs| {
        counter.count(model_id, msgs, system) <= target
    });
    if counter.count(model_id, &current, system) <= target {
        return current;
    }

    // The original recurses with the threshold halved and a decrementing
    // iteration budget, falling through to tier 6 once exhausted.
    if iterations_left > 0 {
        let halved_target = target / 2;
        current = compress_to_target(current, model_id, counter, system, halved_target, config, iterations_left - 1);
        if counter.count(model_id, &current, system) <= target {
            return current;
        }
    }

    // Tier 6: middle-out cap, independent of token count.
    middle_out_cap(current, config.middle_out_max_groups)
}

fn compress_tool_outputs(messages: Vec<Message>, keep_recent: usize, truncate_len: usize) -> Vec<Message> {
    let tool_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Tool)
        .map(|(i, _)| i)
        .collect();
    let cutoff = tool_indices.len().saturating_sub(keep_recent);
    let compress_set: std::collections::HashSet<usize> = tool_indices[..cutoff].iter().copied().collect();

    messages
        .into_iter()
        .enumerate()
        .map(|(i, mut m)| {
            if compress_set.contains(&i) {
                if let Some(text) = m.content.as_text() {
                    let summary = format!(
                        "[tool result omitted to save context; original message {}]\n{}",
                        m.message_id,
                        truncate_with_marker(text, truncate_len.min(200))
                    );
                    m.content = Content::Text(summary);
                }
            }
            m
        })
        .collect()
}

fn compress_role_text(messages: Vec<Message>, role: Role, keep_recent: usize, truncate_len: usize) -> Vec<Message> {
    let role_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == role)
        .map(|(i, _)| i)
        .collect();
    let cutoff = role_indices.len().saturating_sub(keep_recent);
    let compress_set: std::collections::HashSet<usize> = role_indices[..cutoff].iter().copied().collect();

    messages
        .into_iter()
        .enumerate()
        .map(|(i, mut m)| {
            if compress_set.contains(&i) {
                if let Some(text) = m.content.as_text() {
                    if text.chars().count() > truncate_len {
                        m.content = Content::Text(truncate_with_marker(text, truncate_len));
                    }
                }
            }
            m
        })
        .collect()
}

fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}{TRUNCATION_MARKER}")
}

/// Tier 5: operates on whole Message Groups, never splitting one, removing
/// from the middle first so the most recent and the opening turns survive.
fn omit_middle_groups(
    messages: Vec<Message>,
    min_groups_to_keep: usize,
    under_target: impl Fn(&[Message]) -> bool,
) -> Vec<Message> {
    let mut groups = group_messages(&messages);
    if groups.len() <= min_groups_to_keep {
        return messages;
    }

    loop {
        let flat = flatten(&groups);
        if under_target(&flat) || groups.len() <= min_groups_to_keep {
            return flat;
        }
        let middle = groups.len() / 2;
        groups.remove(middle);
    }
}

/// Tier 6: unconditional cap, keeping a prefix and suffix of groups.
/// `max_messages` is a budget on the number of *messages* admitted into the
/// prompt, not groups directly — groups vary in size (a tool-turn group is
/// commonly 2-3 messages), so it's converted to a group-count target via the
/// average group size observed in this history, mirroring
/// `context_manager.py`'s `middle_out_messages`.
fn middle_out_cap(messages: Vec<Message>, max_messages: usize) -> Vec<Message> {
    let groups = group_messages(&messages);
    let len = groups.len();
    if len == 0 {
        return messages;
    }
    let avg_group_len = (messages.len() as f64 / len as f64).max(1.0);
    let max_groups = ((max_messages as f64 / avg_group_len) as usize).max(4);
    if len <= max_groups {
        return messages;
    }
    let head = max_groups / 2;
    let tail = max_groups - head;
    let selected: Vec<MessageGroup> = groups
        .into_iter()
        .enumerate()
        .filter(|(i, _)| *i < head || *i >= len - tail)
        .map(|(_, g)| g)
        .collect();
    flatten(&selected)
}

fn flatten(groups: &[MessageGroup]) -> Vec<Message> {
    groups.iter().cloned().flat_map(MessageGroup::into_messages).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::{ModelCapabilities, ModelFamily, Pricing, ThreadId};
    use uuid::Uuid;

    struct FixedCounter(u32);
    impl MessageCounter for FixedCounter {
        fn count(&self, _model_id: &str, messages: &[Message], _system: Option<&str>) -> u32 {
            messages
                .iter()
                .map(|m| m.content.char_len() as u32 / 4)
                .sum::<u32>()
                .max(self.0)
        }
    }

    struct CharCounter;
    impl MessageCounter for CharCounter {
        fn count(&self, _model_id: &str, messages: &[Message], _system: Option<&str>) -> u32 {
            messages.iter().map(|m| m.content.char_len() as u32).sum()
        }
    }

    fn model(window: u32) -> ModelDescriptor {
        ModelDescriptor {
            id: "test-model".into(),
            family: ModelFamily::Other,
            context_window: window,
            capabilities: ModelCapabilities::default(),
            pricing: Pricing::default(),
            transport_id: "test-model".into(),
        }
    }

    fn tid() -> ThreadId {
        Uuid::new_v4()
    }

    #[test]
    fn returns_untouched_when_under_budget() {
        let t = tid();
        let messages = vec![Message::user(t, "hi")];
        let m = model(200_000);
        let counter = CharCounter;
        let out = compress(messages.clone(), &m, &counter, None, &CompressionConfig::default());
        assert_eq!(out.len(), messages.len());
    }

    #[test]
    fn truncates_old_user_messages_over_budget() {
        let t = tid();
        let long = "x".repeat(5000);
        let mut messages: Vec<Message> = (0..15).map(|_| Message::user(t, long.clone())).collect();
        messages.push(Message::user(t, "recent"));
        let m = model(1000);
        let counter = CharCounter;
        let config = CompressionConfig {
            recent_user_messages_kept: 2,
            truncate_chars: 100,
            ..Default::default()
        };
        let out = compress(messages, &m, &counter, None, &config);
        let truncated = out
            .iter()
            .filter(|m| m.content.as_text().is_some_and(|t| t.contains("[truncated]")))
            .count();
        assert!(truncated > 0);
    }

    #[test]
    fn group_omission_preserves_head_and_tail() {
        let t = tid();
        let mut messages = Vec::new();
        for i in 0..50 {
            messages.push(Message::user(t, format!("message {i} {}", "z".repeat(200))));
        }
        let m = model(1000);
        let counter = CharCounter;
        let config = CompressionConfig {
            min_groups_to_keep: 5,
            truncate_chars: 50,
            ..Default::default()
        };
        let out = compress(messages, &m, &counter, None, &config);
        assert!(out.len() >= config.min_groups_to_keep);
        assert!(out.first().unwrap().content.as_text().unwrap().contains("message 0"));
    }

    #[test]
    fn middle_out_cap_treats_budget_as_message_count() {
        let t = tid();
        // 60 single-message groups, cap of 12 messages -> group target is
        // max(4, 12 / 1) = 12, not 60 groups admitted wholesale.
        let messages: Vec<Message> = (0..60).map(|i| Message::user(t, format!("m{i}"))).collect();
        let out = middle_out_cap(messages, 12);
        assert_eq!(out.len(), 12);
    }

    #[test]
    fn middle_out_cap_scales_target_by_average_group_size() {
        let t = tid();
        // 30 groups of 3 messages each (user + assistant + tool), 90
        // messages total. A 12-message budget divided by avg group size 3
        // yields a target of 4 groups (the floor), i.e. 12 messages kept.
        let mut messages = Vec::new();
        for i in 0..30 {
            messages.push(Message::user(t, format!("ask {i}")));
            messages.push(Message::assistant_with_tool_calls(
                t,
                "",
                vec![nexus_core::ToolCall { id: format!("call-{i}"), name: "tool".into(), arguments: "{}".into() }],
            ));
            messages.push(Message::tool_result(t, format!("call-{i}"), "result"));
        }
        let out = middle_out_cap(messages, 12);
        assert_eq!(out.len(), 12);
    }
}
