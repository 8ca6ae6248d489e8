use async_trait::async_trait;
use nexus_core::{Message, ThreadId};

/// Memory provider (§6 EXTERNAL INTERFACES, optional). When configured, its
/// block is injected into the assembled prompt between the system message
/// and the compressed history (§4.4); long-term memory storage, retrieval
/// ranking, and anything else memory-shaped is a surrounding system (§1).
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn fetch_block(&self, thread_id: ThreadId) -> Option<Message>;
}

/// The default when no memory backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemory;

#[async_trait]
impl MemoryProvider for NoMemory {
    async fn fetch_block(&self, _thread_id: ThreadId) -> Option<Message> {
        None
    }
}
