//! # ToolRelay Core
//!
//! Domain types, traits, and error definitions for the ToolRelay agent loop.
//! It knows nothing about HTTP or a particular model vendor: it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! The two external collaborators of the agent loop are defined as traits here:
//! - [`Provider`] is the completion gateway (buffered or streamed responses)
//! - [`Tool`] / [`BlockingTool`] are the callables behind the [`ToolRegistry`]
//!
//! Implementations live in their respective crates, which keeps the loop easy
//! to drive with scripted providers in tests.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, Role, ToolCallRequest};
pub use provider::{
    DeltaReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallFragment,
    ToolDefinition, Usage, replay_response,
};
pub use tool::{BlockingTool, FnTool, Tool, ToolCallResult, ToolHandler, ToolRegistry};
