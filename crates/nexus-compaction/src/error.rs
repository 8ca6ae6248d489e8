use thiserror::Error;

/// Compaction is mostly pure and infallible; the few failure modes are
/// assembler-side, where provider cache rules can reject a marker.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("cache marker rejected by provider rules: {0}")]
    InvalidCacheMarker(String),
}
