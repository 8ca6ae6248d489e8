use nexus_core::Message;
use serde_json::{json, Value};

use crate::error::CompactionError;
use crate::wire::message_to_wire;

/// Up to this many cache-control markers are placed per request (§4.4). The
/// real providers cap this lower (Anthropic allows four `ephemeral` blocks
/// per request as of this writing); the default here matches that cap and
/// a provider with a tighter limit passes a smaller value in.
pub const DEFAULT_MAX_CACHE_BLOCKS: usize = 4;

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub max_cache_blocks: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_cache_blocks: DEFAULT_MAX_CACHE_BLOCKS,
        }
    }
}

/// The final ordered request body, ready to drop into
/// `nexus_provider::InferenceRequest`. `system` is block-structured (one
/// text block, normally) so a `cache_control` marker has somewhere to
/// attach — a bare string has no place to carry one.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub system: Option<Vec<Value>>,
    pub messages: Vec<Value>,
    /// How many cache-control markers were actually placed. Zero whenever
    /// the model doesn't support prompt caching, regardless of budget.
    pub cache_markers_placed: usize,
}

/// `assemble(system, memory_block?, history, supports_caching) -> prompt`
/// (§4.4). Builds `[system] + [memory_block?] + compressed_history`, then,
/// when the model supports prompt caching, marks up to `max_cache_blocks`
/// positions chosen to maximize reuse, in priority order: the system block,
/// the end of the memory block (if any), and two points deep in history
/// that stay stable turn over turn rather than drifting with every newly
/// appended message.
///
/// `history` is expected to already be the output of [`crate::compress`] —
/// this function does not itself drop or reorder messages, only shapes and
/// annotates them.
pub fn assemble(
    system: Option<&str>,
    memory_block: Option<&Message>,
    history: &[Message],
    supports_caching: bool,
    config: &AssemblerConfig,
) -> Result<AssembledPrompt, CompactionError> {
    let mut messages = Vec::with_capacity(history.len() + 1);

    if let Some(memory) = memory_block {
        messages.push(message_to_wire(memory));
    }
    let history_start = messages.len();

    for message in history {
        if !message.omitted {
            messages.push(message_to_wire(message));
        }
    }

    let mut system_blocks = system.map(|text| vec![json!({"type": "text", "text": text})]);

    let mut cache_markers_placed = 0;
    let mut budget = config.max_cache_blocks;
    if supports_caching {
        if let Some(blocks) = system_blocks.as_mut() {
            if budget > 0 {
                if let Some(last) = blocks.last_mut() {
                    last["cache_control"] = cache_control_block();
                    cache_markers_placed += 1;
                    budget -= 1;
                }
            }
        }
        cache_markers_placed += mark_cache_points(&mut messages, history_start, budget)?;
    }

    Ok(AssembledPrompt {
        system: system_blocks,
        messages,
        cache_markers_placed,
    })
}

/// Places markers at the end of the memory block (if present) and at two
/// fractional offsets into history (roughly a third and two-thirds of the
/// way through). Fractional offsets are deliberately insensitive to the
/// handful of messages appended since the last turn, so the same early
/// messages keep getting marked and the cache stays warm; a scheme that
/// anchored to the *tail* instead would invalidate on every turn.
fn mark_cache_points(
    messages: &mut [Value],
    history_start: usize,
    max_cache_blocks: usize,
) -> Result<usize, CompactionError> {
    let mut positions = Vec::with_capacity(max_cache_blocks);
    let mut budget = max_cache_blocks;

    if history_start > 0 && budget > 0 {
        positions.push(history_start - 1); // end of the memory block
        budget -= 1;
    }

    let history_len = messages.len().saturating_sub(history_start);
    if history_len > 0 && budget > 0 {
        let candidates = [history_start + history_len / 3, history_start + (history_len * 2) / 3];
        for candidate in candidates {
            if budget == 0 {
                break;
            }
            if candidate < messages.len() && !positions.contains(&candidate) {
                positions.push(candidate);
                budget -= 1;
            }
        }
    }

    validate_cache_markers(positions.len(), max_cache_blocks)?;

    for position in &positions {
        mark_message_cache(&mut messages[*position]);
    }
    Ok(positions.len())
}

fn cache_control_block() -> Value {
    json!({"type": "ephemeral"})
}

/// Attaches a `cache_control` marker to a wire message, converting a
/// plain-string `content` into the single-block array form providers
/// require once any block within it carries a marker.
fn mark_message_cache(message: &mut Value) {
    match message.get("content").cloned() {
        Some(Value::String(text)) => {
            message["content"] = json!([{
                "type": "text",
                "text": text,
                "cache_control": cache_control_block(),
            }]);
        }
        Some(Value::Array(mut blocks)) => {
            if let Some(last) = blocks.last_mut() {
                last["cache_control"] = cache_control_block();
                message["content"] = Value::Array(blocks);
            }
        }
        _ => {}
    }
}

fn validate_cache_markers(count: usize, max: usize) -> Result<(), CompactionError> {
    if count > max {
        return Err(CompactionError::InvalidCacheMarker(format!(
            "{count} cache markers requested, provider allows at most {max}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::ThreadId;
    use uuid::Uuid;

    fn tid() -> ThreadId {
        Uuid::new_v4()
    }

    #[test]
    fn no_markers_when_caching_unsupported() {
        let t = tid();
        let history = vec![Message::user(t, "hi"), Message::assistant_text(t, "hello")];
        let prompt = assemble(Some("be nice"), None, &history, false, &AssemblerConfig::default()).unwrap();
        assert_eq!(prompt.cache_markers_placed, 0);
        for m in &prompt.messages {
            assert!(m.get("content").unwrap().is_string());
        }
    }

    #[test]
    fn marks_memory_block_and_deep_history_points() {
        let t = tid();
        let memory = Message::system(t, "summary of earlier turns");
        let history: Vec<Message> = (0..12)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(t, format!("msg {i}"))
                } else {
                    Message::assistant_text(t, format!("reply {i}"))
                }
            })
            .collect();
        let prompt = assemble(Some("sys"), Some(&memory), &history, true, &AssemblerConfig::default()).unwrap();
        assert!(prompt.cache_markers_placed >= 3);
        assert!(prompt.cache_markers_placed <= DEFAULT_MAX_CACHE_BLOCKS);

        let system_marked = prompt.system.as_ref().unwrap().last().unwrap().get("cache_control").is_some();
        assert!(system_marked, "system block should carry one of the cache markers");

        let marked_count = prompt
            .messages
            .iter()
            .filter(|m| {
                m.get("content")
                    .and_then(|c| c.as_array())
                    .and_then(|blocks| blocks.last())
                    .and_then(|b| b.get("cache_control"))
                    .is_some()
            })
            .count();
        assert_eq!(marked_count + 1, prompt.cache_markers_placed);

        // the memory block itself should be one of the marked messages
        let memory_wire = &prompt.messages[0];
        assert!(memory_wire.get("content").unwrap().is_array());
    }

    #[test]
    fn omitted_messages_are_skipped() {
        let t = tid();
        let mut omitted = Message::tool_result(t, "c1", "stale");
        omitted.omitted = true;
        let history = vec![omitted, Message::user(t, "hi")];
        let prompt = assemble(None, None, &history, true, &AssemblerConfig::default()).unwrap();
        assert_eq!(prompt.messages.len(), 1);
    }

    #[test]
    fn respects_a_tighter_provider_cap() {
        let t = tid();
        let memory = Message::system(t, "summary");
        let history: Vec<Message> = (0..20).map(|i| Message::user(t, format!("m{i}"))).collect();
        let config = AssemblerConfig { max_cache_blocks: 1 };
        let prompt = assemble(None, Some(&memory), &history, true, &config).unwrap();
        assert_eq!(prompt.cache_markers_placed, 1);
    }

    #[test]
    fn system_block_takes_priority_in_a_tight_budget() {
        let t = tid();
        let memory = Message::system(t, "summary");
        let history: Vec<Message> = (0..20).map(|i| Message::user(t, format!("m{i}"))).collect();
        let config = AssemblerConfig { max_cache_blocks: 1 };
        let prompt = assemble(Some("sys"), Some(&memory), &history, true, &config).unwrap();
        assert_eq!(prompt.cache_markers_placed, 1);
        assert!(prompt.system.as_ref().unwrap().last().unwrap().get("cache_control").is_some());
        assert!(prompt.messages.iter().all(|m| m.get("content").unwrap().is_string()));
    }
}
