//! # chatrelay Core
//!
//! Domain types, traits, and error definitions for the chatrelay streaming
//! agent runtime. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping model backends via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod chat;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentPlatform, AiAgent, bot_user_id, normalize_channel_id};
pub use chat::{ChatApi, EventListener};
pub use error::{ChatError, Error, ProviderError, Result, ToolError};
pub use event::{AiState, ChatEvent, IndicatorEvent};
pub use message::{ChatMessage, ImageUpload, MessageAttachment, MessageUpdate, UserRef};
pub use provider::{
    ChatModel, ContentPart, EventStream, PromptMessage, ResponseEvent, Role, ToolDefinition,
    TurnInput,
};
pub use tool::Tool;
