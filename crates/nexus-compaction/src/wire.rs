use nexus_core::{Content, Message, ModelRegistry, Role};
use nexus_pricing::{ExactCounter, TokenAccountant};
use serde_json::{json, Value};

/// Shapes a store `Message` into the provider-neutral wire form
/// `nexus-provider::InferenceRequest.messages` expects. Shared between the
/// compressor (for counting) and the assembler (for the final request).
pub fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let content = match &message.content {
        Content::Text(text) => json!(text),
        Content::Blocks(blocks) => json!(blocks),
    };

    let mut value = json!({
        "role": role,
        "content": content,
    });

    if let Some(tool_calls) = &message.tool_calls {
        value["tool_calls"] = json!(tool_calls
            .iter()
            .map(|c| json!({"id": c.id, "name": c.name, "arguments": c.arguments}))
            .collect::<Vec<_>>());
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        value["tool_call_id"] = json!(tool_call_id);
    }

    value
}

pub fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(message_to_wire).collect()
}

/// Counting contract used by the compressor, expressed over store
/// `Message`s rather than the `Value` wire form `nexus-pricing::count`
/// itself takes — the conversion above is an implementation detail the
/// compressor shouldn't need to repeat at every call site.
pub trait MessageCounter: Send + Sync {
    fn count(&self, model_id: &str, messages: &[Message], system: Option<&str>) -> u32;
}

impl<R: ModelRegistry, C: ExactCounter> MessageCounter for TokenAccountant<R, C> {
    fn count(&self, model_id: &str, messages: &[Message], system: Option<&str>) -> u32 {
        let wire = to_wire_messages(messages);
        TokenAccountant::count(self, model_id, &wire, system)
    }
}
