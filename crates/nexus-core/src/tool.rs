use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Static facts about a registered tool (§3). The executor itself lives in
/// `nexus-tools`'s registry; this is the descriptor half consumed by the
/// prompt assembler and the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub schema: Value,
    /// Tag name used for the XML calling convention (§4.5), if the tool
    /// supports it. Native tool calling never needs this.
    pub xml_tag: Option<String>,
    /// Whether this tool may be dispatched concurrently with other
    /// parallel-safe tools declared in the same assistant turn (§4.5).
    pub parallel_safe: bool,
    /// Per-tool override of the dispatcher's default timeout (§4.5). `None`
    /// defers to the dispatcher's configured default.
    pub timeout_secs: Option<u64>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            xml_tag: None,
            parallel_safe: false,
            timeout_secs: None,
        }
    }

    pub fn parallel_safe(mut self) -> Self {
        self.parallel_safe = true;
        self
    }

    pub fn with_xml_tag(mut self, tag: impl Into<String>) -> Self {
        self.xml_tag = Some(tag.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}
