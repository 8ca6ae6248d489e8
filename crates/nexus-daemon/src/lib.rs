//! The Stream Response Processor (C5), Auto-Continue Controller (C6), and
//! Thread Orchestrator (C7): the part of the thread execution engine that
//! actually drives a run end to end. Everything upstream of this crate
//! (token accounting, compression, pairing, prompt assembly, transports) is
//! pure and synchronous or stateless; this is where the async control flow,
//! the tool dispatcher, and the bounded auto-continue loop live.

pub mod billing;
pub mod continue_ctrl;
pub mod error;
pub mod event;
pub mod memory;
pub mod orchestrator;
pub mod stream;

pub use billing::{BillingSink, LoggingBillingSink};
pub use continue_ctrl::{AutoContinueConfig, ContinueDecision, ErrorAction, ErrorRetryState};
pub use error::OrchestratorError;
pub use event::{AgentEvent, FinishReason, RunState};
pub use memory::{MemoryProvider, NoMemory};
pub use orchestrator::{OrchestratorConfig, ProviderRouter, StaticProviderRouter, ThreadOrchestrator};
pub use stream::{ProcessedTurn, StreamConfig, StreamEnd};
