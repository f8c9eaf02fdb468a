//! Streaming model backend implementations for chatrelay.
//!
//! All backends implement the `chatrelay_core::ChatModel` trait and emit the
//! same normalized `ResponseEvent` vocabulary, so the response handler never
//! sees a wire protocol.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicMessagesClient;
pub use openai::OpenAiResponsesClient;
