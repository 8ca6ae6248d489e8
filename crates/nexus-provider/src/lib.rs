//! Streaming LLM transport trait and error taxonomy for the Nexus thread
//! execution engine.

pub mod error;
pub mod provider;
pub mod types;

pub use error::{classify, InferenceError};
pub use provider::{DeltaStream, InferenceProvider};
pub use types::{InferenceRequest, StopReason, StreamDelta, ThinkingConfig, ToolChoice, Usage};
