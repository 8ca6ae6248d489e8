use async_trait::async_trait;
use nexus_core::{MessageId, ThreadId, UsageReport};
use tracing::info;

/// Billing sink (§6 EXTERNAL INTERFACES — "record usage against an account;
/// optionally veto a run for insufficient credits"). The core only ever
/// *records*; enforcing a balance, issuing invoices, and everything else
/// billing-shaped lives in a surrounding system (§1).
#[async_trait]
pub trait BillingSink: Send + Sync {
    async fn record(&self, account_id: &str, thread_id: ThreadId, message_id: Option<MessageId>, usage: &UsageReport);

    /// Re-checked by the orchestrator before every iteration (§4.7). The
    /// default always allows the run — most deployments without a real
    /// billing backend have no concept of insufficient credits at all.
    async fn has_sufficient_credits(&self, _account_id: &str) -> bool {
        true
    }
}

/// A sink that logs usage at `info` and never vetoes a run. The default for
/// the demo binary and for tests that don't care about billing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBillingSink;

#[async_trait]
impl BillingSink for LoggingBillingSink {
    async fn record(&self, account_id: &str, thread_id: ThreadId, message_id: Option<MessageId>, usage: &UsageReport) {
        info!(
            account_id,
            %thread_id,
            ?message_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            estimated = usage.estimated,
            fallback = usage.fallback,
            "usage recorded"
        );
    }
}
