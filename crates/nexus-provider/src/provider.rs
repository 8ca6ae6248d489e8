use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::InferenceError;
use crate::types::{InferenceRequest, StreamDelta};

pub type DeltaStream = BoxStream<'static, Result<StreamDelta, InferenceError>>;

/// Pure streaming LLM call. No state, no history, no context management —
/// those are `nexus-compaction`'s and `nexus-daemon`'s jobs (§6 EXTERNAL
/// INTERFACES: "LLM transport").
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn stream(&self, request: InferenceRequest) -> Result<DeltaStream, InferenceError>;
}

/// Blanket impl so `Box<dyn InferenceProvider>` / `Arc<dyn InferenceProvider>`
/// can be passed directly wherever an `InferenceProvider` is expected.
#[async_trait]
impl InferenceProvider for Box<dyn InferenceProvider> {
    async fn stream(&self, request: InferenceRequest) -> Result<DeltaStream, InferenceError> {
        (**self).stream(request).await
    }
}

#[async_trait]
impl InferenceProvider for std::sync::Arc<dyn InferenceProvider> {
    async fn stream(&self, request: InferenceRequest) -> Result<DeltaStream, InferenceError> {
        (**self).stream(request).await
    }
}
