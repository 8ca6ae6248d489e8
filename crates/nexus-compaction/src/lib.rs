//! Context Compressor (C2), Tool-Call Pairing Invariant (C3), and Prompt
//! Assembler (C4) for the thread execution engine. Pure, synchronous, and
//! provider-agnostic: this crate never makes a network call and never holds
//! a message store or an LLM transport open.

pub mod assembler;
pub mod compress;
pub mod error;
pub mod pairing;
pub mod wire;

pub use assembler::{assemble, AssembledPrompt, AssemblerConfig, DEFAULT_MAX_CACHE_BLOCKS};
pub use compress::{compress, CompressionConfig};
pub use error::CompactionError;
pub use pairing::{repair, strip_tool_content, validate, PairingRepair, PairingValidation};
pub use wire::{message_to_wire, to_wire_messages, MessageCounter};
