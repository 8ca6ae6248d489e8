use serde::{Deserialize, Serialize};

/// Which token-counting / request-shaping family a model belongs to (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    Anthropic,
    Bedrock,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub vision: bool,
    pub native_tool_calls: bool,
    pub prompt_caching: bool,
    pub reasoning: bool,
}

/// Per-million-token pricing, in USD. Mirrors the tuple named in §3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

/// Static facts about a model (§3). Process-wide, initialized once at
/// startup; read-only afterward (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub family: ModelFamily,
    pub context_window: u32,
    pub capabilities: ModelCapabilities,
    pub pricing: Pricing,
    /// The id the LLM gateway itself expects (may differ from `id`, e.g. a
    /// Bedrock inference-profile ARN vs. a friendly catalog name).
    pub transport_id: String,
}

impl ModelDescriptor {
    /// The output-headroom reserve tier from §4.2: `max_tokens(model)`.
    pub fn max_tokens(&self) -> u32 {
        let w = self.context_window as u64;
        let reserved = if w >= 1_000_000 {
            w - 300_000
        } else if w >= 400_000 {
            w - 64_000
        } else if w >= 200_000 {
            w - 32_000
        } else if w >= 100_000 {
            w - 16_000
        } else {
            (w as f64 * 0.84) as u64
        };
        reserved as u32
    }
}

/// `get(id) -> ModelDescriptor`, `context_window`, `supports_vision`,
/// `transport_id`, `pricing` (§6 EXTERNAL INTERFACES).
pub trait ModelRegistry: Send + Sync {
    fn get(&self, id: &str) -> Option<ModelDescriptor>;

    fn context_window(&self, id: &str) -> Option<u32> {
        self.get(id).map(|m| m.context_window)
    }

    fn supports_vision(&self, id: &str) -> bool {
        self.get(id).is_some_and(|m| m.capabilities.vision)
    }

    fn transport_id(&self, id: &str) -> Option<String> {
        self.get(id).map(|m| m.transport_id)
    }

    fn pricing(&self, id: &str) -> Option<Pricing> {
        self.get(id).map(|m| m.pricing)
    }
}

impl ModelRegistry for std::sync::Arc<dyn ModelRegistry> {
    fn get(&self, id: &str) -> Option<ModelDescriptor> {
        (**self).get(id)
    }
}

/// A fixed, in-process registry seeded at construction. Real deployments
/// would back this with a catalog service; that catalog is out of scope
/// here (§1 — "model-catalog metadata" is a surrounding system).
#[derive(Debug, Clone, Default)]
pub struct StaticModelRegistry {
    models: std::collections::HashMap<String, ModelDescriptor>,
}

impl StaticModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Self {
        self.models.insert(descriptor.id.clone(), descriptor);
        self
    }

    /// A small built-in seed covering one model per family, useful for the
    /// demo binary and integration tests.
    pub fn seeded() -> Self {
        Self::new()
            .with_model(ModelDescriptor {
                id: "claude-sonnet-4-20250514".into(),
                family: ModelFamily::Anthropic,
                context_window: 200_000,
                capabilities: ModelCapabilities {
                    vision: true,
                    native_tool_calls: true,
                    prompt_caching: true,
                    reasoning: true,
                },
                pricing: Pricing {
                    input_per_million: 3.0,
                    output_per_million: 15.0,
                    cache_read_per_million: 0.3,
                    cache_write_per_million: 3.75,
                },
                transport_id: "claude-sonnet-4-20250514".into(),
            })
            .with_model(ModelDescriptor {
                id: "bedrock/anthropic.claude-3-5-sonnet".into(),
                family: ModelFamily::Bedrock,
                context_window: 200_000,
                capabilities: ModelCapabilities {
                    vision: true,
                    native_tool_calls: true,
                    prompt_caching: true,
                    reasoning: false,
                },
                pricing: Pricing {
                    input_per_million: 3.0,
                    output_per_million: 15.0,
                    cache_read_per_million: 0.3,
                    cache_write_per_million: 3.75,
                },
                transport_id: "anthropic.claude-3-5-sonnet-20241022-v2:0".into(),
            })
    }
}

impl ModelRegistry for StaticModelRegistry {
    fn get(&self, id: &str) -> Option<ModelDescriptor> {
        self.models.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_tokens_tiers() {
        let d = |w: u32| ModelDescriptor {
            id: "x".into(),
            family: ModelFamily::Other,
            context_window: w,
            capabilities: ModelCapabilities::default(),
            pricing: Pricing::default(),
            transport_id: "x".into(),
        };
        assert_eq!(d(1_500_000).max_tokens(), 1_200_000);
        assert_eq!(d(500_000).max_tokens(), 436_000);
        assert_eq!(d(200_000).max_tokens(), 168_000);
        assert_eq!(d(100_000).max_tokens(), 84_000);
        assert_eq!(d(50_000).max_tokens(), 42_000);
    }

    #[test]
    fn seeded_registry_resolves() {
        let reg = StaticModelRegistry::seeded();
        assert!(reg.supports_vision("claude-sonnet-4-20250514"));
        assert_eq!(reg.context_window("bedrock/anthropic.claude-3-5-sonnet"), Some(200_000));
        assert!(reg.get("unknown-model").is_none());
    }
}
