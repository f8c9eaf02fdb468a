//! Chat backend traits — the seam between the agent runtime and the chat
//! service.
//!
//! [`ChatApi`] is a channel-scoped handle: every operation targets the one
//! channel the agent serves. [`EventListener`] is the realtime side — a
//! long-lived connection that feeds decoded events to the agent.

use async_trait::async_trait;

use crate::error::ChatError;
use crate::event::IndicatorEvent;
use crate::message::{ChatMessage, ImageUpload, MessageUpdate};

/// Channel-scoped chat backend operations.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// The composite channel id this handle is bound to (`type:id`).
    fn cid(&self) -> &str;

    /// Create the empty AI placeholder message a turn streams into.
    ///
    /// The message is flagged `ai_generated` and threaded under `parent_id`
    /// when the triggering message was itself a reply.
    async fn create_ai_message(
        &self,
        parent_id: Option<&str>,
    ) -> std::result::Result<ChatMessage, ChatError>;

    /// Apply a partial update to an existing message.
    async fn partial_update_message(
        &self,
        message_id: &str,
        update: &MessageUpdate,
    ) -> std::result::Result<(), ChatError>;

    /// Send an indicator event into the channel.
    async fn send_event(&self, event: &IndicatorEvent) -> std::result::Result<(), ChatError>;

    /// Upload generated image bytes, returning CDN URLs.
    async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> std::result::Result<ImageUpload, ChatError>;
}

/// A realtime event source the agent can start and stop.
///
/// Implementations own their reconnect policy; `stop` must be prompt and
/// both operations are idempotent.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn start(&self) -> std::result::Result<(), ChatError>;

    async fn stop(&self);
}
