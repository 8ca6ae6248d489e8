use thiserror::Error;

/// Failures from a [`crate::store::MessageStore`] implementation. Per §4.8,
/// list operations have a hard timeout; the orchestrator treats `Timeout`
/// as retryable and everything else as a turn-aborting store failure (§7,
/// "Store unavailable").
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("thread {0} not found")]
    ThreadNotFound(crate::message::ThreadId),
    #[error("message store operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("message store error: {0}")]
    Internal(String),
}
