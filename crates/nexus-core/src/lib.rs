//! Shared data model and message-store interface for the Nexus thread
//! execution engine: the types every other `nexus-*` crate builds on.

pub mod error;
pub mod message;
pub mod model;
pub mod run;
pub mod store;
pub mod thread;
pub mod tool;
pub mod usage;

pub use error::StoreError;
pub use message::{
    flatten_groups, group_messages, Content, Message, MessageGroup, MessageId, Role, ThreadId,
    ToolCall,
};
pub use model::{ModelCapabilities, ModelDescriptor, ModelFamily, ModelRegistry, Pricing, StaticModelRegistry};
pub use run::{AgentRun, RunId, RunStatus};
pub use store::{InMemoryMessageStore, MessageStore};
pub use thread::{Thread, ThreadMetadata};
pub use tool::ToolDescriptor;
pub use usage::UsageReport;
