use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::ThreadId;

pub type RunId = Uuid;

/// Terminal status of an [`AgentRun`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
    Error,
}

/// A single invocation of the Orchestrator against a thread (§3). Exists
/// only for the duration of the call plus its stream; not persisted beyond
/// that — the message store, not the run record, is the durable log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub model_id: String,
    pub status: RunStatus,
    /// Count of native auto-continue iterations executed so far (§4.6).
    pub iterations: u32,
}

impl AgentRun {
    pub fn new(thread_id: ThreadId, model_id: impl Into<String>) -> Self {
        Self {
            id: RunId::new_v4(),
            thread_id,
            model_id: model_id.into(),
            status: RunStatus::Running,
            iterations: 0,
        }
    }
}
