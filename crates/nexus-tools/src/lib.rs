//! Tool registry and dispatch policy: the tool-call half of the Stream
//! Response Processor (C5). Grounded on the teacher's `tools/registry.rs`
//! and `tools/handler.rs`, generalized from a single linear catalog with a
//! `tool_search` meta-tool into the thread engine's concurrency/timeout/
//! XML-tag-resolution contract (§4.5); the meta-tool search surface isn't
//! part of that contract and was dropped rather than carried along unused.

pub mod dispatch;
pub mod registry;

pub use dispatch::{dispatch, DispatchConfig, ToolCallRequest, ToolOutcome, ToolResult, DEFAULT_TOOL_TIMEOUT};
pub use registry::{ToolExecutor, ToolRegistry};
