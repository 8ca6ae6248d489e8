use thiserror::Error;

use nexus_compaction::CompactionError;
use nexus_core::StoreError;
use nexus_provider::InferenceError;

/// Turn-level failure taxonomy for the Thread Orchestrator (C7, §7). Every
/// variant here is something `run_thread` gives up on for the *current*
/// iteration; the Auto-Continue Controller decides separately whether that
/// warrants a retry.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] InferenceError),
    #[error(transparent)]
    Compaction(#[from] CompactionError),
    #[error("model {0} is not registered")]
    UnknownModel(String),
    #[error("no inference provider registered for model {0}")]
    NoProvider(String),
    #[error("token accounting worker pool task failed: {0}")]
    Compute(String),
}
