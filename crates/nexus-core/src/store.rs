use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::message::{Message, MessageId, ThreadId};
use crate::usage::UsageReport;

/// Append-only log of thread messages with the compact query surface the
/// core consumes (§4.8). Implementations MUST honor insertion order as the
/// single source of truth — the core never reorders messages itself.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, thread_id: ThreadId, message: Message) -> Result<MessageId, StoreError>;

    /// `lightweight = true` fetches only a bounded recent window with
    /// minimal payload for warm-start display; it MUST NOT be used for
    /// prompt construction (§4.8).
    async fn list(&self, thread_id: ThreadId, lightweight: bool) -> Result<Vec<Message>, StoreError>;

    async fn list_paginated(
        &self,
        thread_id: ThreadId,
        offset: usize,
        batch_size: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn get_last_usage_record(&self, thread_id: ThreadId) -> Result<Option<UsageReport>, StoreError>;

    /// Records the usage for a completed iteration so the next call's fast
    /// path (§4.7) can read it back via `get_last_usage_record`.
    async fn record_usage(&self, thread_id: ThreadId, usage: UsageReport) -> Result<(), StoreError>;

    async fn get_latest_user_message(&self, thread_id: ThreadId) -> Result<Option<String>, StoreError>;

    /// Persistent repair (§4.3): marks the given tool-result messages
    /// `omitted` so the orphan does not reappear on next fetch. Returns the
    /// number of rows actually updated.
    async fn mark_tool_results_omitted(
        &self,
        thread_id: ThreadId,
        ids: &[String],
    ) -> Result<usize, StoreError>;

    /// Persistent repair (§4.3): strips the named ids out of any assistant
    /// message's `tool_calls` list. Returns the number of assistant rows
    /// updated.
    async fn remove_tool_calls_from_assistants(
        &self,
        thread_id: ThreadId,
        ids: &[String],
    ) -> Result<usize, StoreError>;

    async fn set_cache_needs_rebuild(&self, thread_id: ThreadId, value: bool) -> Result<(), StoreError>;

    async fn get_cache_needs_rebuild(&self, thread_id: ThreadId) -> Result<bool, StoreError>;

    /// Drops the in-process read cache for a thread. A no-op for stores
    /// with no such cache; mandatory on append and on persisted repair for
    /// stores that do have one (§9 DESIGN NOTES, "Message cache").
    async fn invalidate_cache(&self, thread_id: ThreadId) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct ThreadRecord {
    messages: Vec<Message>,
    last_usage: Option<UsageReport>,
    cache_needs_rebuild: bool,
}

/// `Vec`-backed per-thread reference implementation, guarded by an async
/// lock (§4.8's implementation note). Suitable for tests and the demo
/// binary; the durable Postgres-backed store is a surrounding system
/// (§1) and out of scope here.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    threads: RwLock<HashMap<ThreadId, ThreadRecord>>,
    list_timeout: Duration,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            list_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, thread_id: ThreadId, message: Message) -> Result<MessageId, StoreError> {
        let id = message.message_id;
        let mut guard = self.threads.write().await;
        guard.entry(thread_id).or_default().messages.push(message);
        Ok(id)
    }

    async fn list(&self, thread_id: ThreadId, lightweight: bool) -> Result<Vec<Message>, StoreError> {
        let fut = async {
            let guard = self.threads.read().await;
            let messages = guard
                .get(&thread_id)
                .map(|r| r.messages.clone())
                .unwrap_or_default();
            if lightweight {
                let start = messages.len().saturating_sub(100);
                messages[start..].to_vec()
            } else {
                messages
            }
        };
        tokio::time::timeout(self.list_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.list_timeout))
    }

    async fn list_paginated(
        &self,
        thread_id: ThreadId,
        offset: usize,
        batch_size: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let guard = self.threads.read().await;
        let messages = guard
            .get(&thread_id)
            .map(|r| r.messages.clone())
            .unwrap_or_default();
        let end = (offset + batch_size).min(messages.len());
        if offset >= messages.len() {
            return Ok(Vec::new());
        }
        Ok(messages[offset..end].to_vec())
    }

    async fn get_last_usage_record(&self, thread_id: ThreadId) -> Result<Option<UsageReport>, StoreError> {
        let guard = self.threads.read().await;
        Ok(guard.get(&thread_id).and_then(|r| r.last_usage.clone()))
    }

    async fn record_usage(&self, thread_id: ThreadId, usage: UsageReport) -> Result<(), StoreError> {
        let mut guard = self.threads.write().await;
        guard.entry(thread_id).or_default().last_usage = Some(usage);
        Ok(())
    }

    async fn get_latest_user_message(&self, thread_id: ThreadId) -> Result<Option<String>, StoreError> {
        let guard = self.threads.read().await;
        Ok(guard.get(&thread_id).and_then(|r| {
            r.messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, crate::message::Role::User))
                .and_then(|m| m.content.as_text().map(str::to_string))
        }))
    }

    async fn mark_tool_results_omitted(
        &self,
        thread_id: ThreadId,
        ids: &[String],
    ) -> Result<usize, StoreError> {
        let mut guard = self.threads.write().await;
        let Some(record) = guard.get_mut(&thread_id) else {
            return Ok(0);
        };
        let mut count = 0;
        for m in record.messages.iter_mut() {
            if let Some(tool_call_id) = &m.tool_call_id {
                if ids.iter().any(|id| id == tool_call_id) && !m.omitted {
                    m.omitted = true;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn remove_tool_calls_from_assistants(
        &self,
        thread_id: ThreadId,
        ids: &[String],
    ) -> Result<usize, StoreError> {
        let mut guard = self.threads.write().await;
        let Some(record) = guard.get_mut(&thread_id) else {
            return Ok(0);
        };
        let mut count = 0;
        for m in record.messages.iter_mut() {
            if let Some(calls) = m.tool_calls.as_mut() {
                let before = calls.len();
                calls.retain(|c| !ids.contains(&c.id));
                if calls.len() != before {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn set_cache_needs_rebuild(&self, thread_id: ThreadId, value: bool) -> Result<(), StoreError> {
        let mut guard = self.threads.write().await;
        guard.entry(thread_id).or_default().cache_needs_rebuild = value;
        Ok(())
    }

    async fn get_cache_needs_rebuild(&self, thread_id: ThreadId) -> Result<bool, StoreError> {
        let guard = self.threads.read().await;
        Ok(guard.get(&thread_id).map(|r| r.cache_needs_rebuild).unwrap_or(false))
    }

    async fn invalidate_cache(&self, _thread_id: ThreadId) -> Result<(), StoreError> {
        // No read cache sits in front of this in-memory store; appends are
        // already visible immediately. Kept as a real async fn (not a no-op
        // stub elided from the trait) so callers exercise the same code
        // path a cached store would require.
        Ok(())
    }
}
