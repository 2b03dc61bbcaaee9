//! Core logic of the farm chat relay: the upstream client, the relay
//! orchestrator, situational context and the record store.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod context;
mod guard;
pub mod relay;
pub mod store;
pub mod upstream;

pub use context::{ContextAnnotation, LocationContext};
pub use relay::{AssistantTurn, Persistence, Relay, RelayBuilder, SendStage};
pub use store::{ConversationId, MemoryStore, RecordStore};
pub use upstream::UpstreamClient;

/// The built-in farming assistant instructions.
pub const SYSTEM_PROMPT: &str = include_str!("system_prompt.md");
