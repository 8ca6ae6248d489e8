use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use nexus_core::ToolDescriptor;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A tool's execution handler (§4.5, §6 EXTERNAL INTERFACES — "tool
/// registry: schemas, resolve(name), execute contract"). Consumers
/// implement this per tool; the registry only knows the descriptor half.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, arguments: &Value, cancel: CancellationToken) -> Result<String, String>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    executor: Arc<dyn ToolExecutor>,
}

/// Catalog of available tools: schemas for the prompt, lookup for dispatch,
/// and the per-tool metadata (parallel-safety, XML tag, timeout override)
/// the dispatcher consults (§4.5).
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_xml_tag: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, descriptor: ToolDescriptor, executor: impl ToolExecutor + 'static) -> Self {
        if let Some(tag) = &descriptor.xml_tag {
            self.by_xml_tag.insert(tag.clone(), self.tools.len());
        }
        self.tools.push(RegisteredTool {
            descriptor,
            executor: Arc::new(executor),
        });
        self
    }

    /// Native tool schemas for the LLM request (§4.4).
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.descriptor.schema.clone()).collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.descriptor.name == name).map(|t| &t.descriptor)
    }

    /// Resolves a declared call name to its executor, or `None` if the LLM
    /// hallucinated a tool name the registry never advertised (§4.5 —
    /// surfaced to the dispatcher as an unknown-tool result, not an error
    /// that aborts the turn).
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.iter().find(|t| t.descriptor.name == name).map(|t| t.executor.clone())
    }

    /// Resolves an XML tag name back to the tool name it maps to (§4.5's
    /// XML calling convention).
    pub fn resolve_xml_tag(&self, tag: &str) -> Option<&str> {
        self.by_xml_tag.get(tag).map(|&i| self.tools[i].descriptor.name.as_str())
    }

    pub fn is_parallel_safe(&self, name: &str) -> bool {
        self.descriptor(name).is_some_and(|d| d.parallel_safe)
    }

    pub fn timeout_override_secs(&self, name: &str) -> Option<u64> {
        self.descriptor(name).and_then(|d| d.timeout_secs)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}
