use serde::{Deserialize, Serialize};

use crate::message::ThreadId;

/// Metadata bag carried on a [`Thread`]. Grows over time; kept as a struct
/// (not a free-form JSON blob) because both fields are read on every
/// orchestrator iteration (§4.7) and deserve real types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadMetadata {
    /// Set when an image has ever been attached to the thread. Drives the
    /// vision-model switch in C7.
    #[serde(default)]
    pub has_images: bool,
    /// Set by the orchestrator after a compression pass; consulted by C4 to
    /// decide whether cached-prefix cache markers must be recomputed.
    #[serde(default)]
    pub cache_needs_rebuild: bool,
}

/// A conversation thread (§3). Threads own messages; deleting one cascades
/// in the [`crate::store::MessageStore`] implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub account_id: String,
    pub project_id: Option<String>,
    pub metadata: ThreadMetadata,
}

impl Thread {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            id: ThreadId::new_v4(),
            account_id: account_id.into(),
            project_id: None,
            metadata: ThreadMetadata::default(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}
