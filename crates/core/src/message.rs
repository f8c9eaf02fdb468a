//! Chat message domain types.
//!
//! These are the value objects exchanged with the chat backend: inbound
//! channel messages with their attachments, and the partial-update payloads
//! the streaming handler pushes into an AI placeholder message.

use serde::{Deserialize, Serialize};

/// A message as it appears in a channel.
///
/// Inbound payloads carry many more fields than we act on; everything not
/// listed here is ignored during deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub text: String,

    /// Set by the backend on messages a bot produced.
    #[serde(default)]
    pub ai_generated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<MessageAttachment>,
}

impl ChatMessage {
    /// Whether this message was authored by an AI bot.
    ///
    /// The flag is authoritative; the user-id prefix covers older messages
    /// written before the backend stamped `ai_generated`.
    pub fn is_from_bot(&self) -> bool {
        self.ai_generated
            || self
                .user
                .as_ref()
                .is_some_and(|u| u.id.starts_with("ai-bot"))
    }

    /// Attachments that qualify as image input for a vision-capable model.
    pub fn image_attachments(&self) -> impl Iterator<Item = &MessageAttachment> {
        self.attachments.iter().filter(|a| a.is_image())
    }
}

/// Minimal reference to a message author.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A message attachment. Only image attachments are acted on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageAttachment {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl MessageAttachment {
    /// Build an image attachment for a generated picture.
    pub fn image(url: impl Into<String>, fallback: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            kind: Some("image".into()),
            mime_type: Some("image/png".into()),
            image_url: Some(url.clone()),
            asset_url: None,
            thumb_url: Some(url),
            fallback: Some(fallback.into()),
        }
    }

    /// An attachment qualifies as an image when it is typed `image` or
    /// carries an `image/*` mime type, and a usable URL exists.
    pub fn is_image(&self) -> bool {
        let typed_image = self.kind.as_deref() == Some("image")
            || self
                .mime_type
                .as_deref()
                .is_some_and(|m| m.starts_with("image/"));
        typed_image && self.image_source().is_some()
    }

    /// Best available URL for the image content.
    pub fn image_source(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .or(self.asset_url.as_deref())
            .or(self.thumb_url.as_deref())
            .filter(|u| !u.is_empty())
    }
}

/// The partial-update payload pushed into an AI placeholder message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub text: String,

    /// True while the response is still streaming.
    pub generating: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<MessageAttachment>>,
}

impl MessageUpdate {
    /// An in-flight flush of the accumulated text buffer.
    pub fn streaming(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            generating: true,
            attachments: None,
        }
    }

    /// The terminal update of a turn.
    pub fn finished(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            generating: false,
            attachments: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<MessageAttachment>) -> Self {
        self.attachments = Some(attachments);
        self
    }
}

/// Result of uploading a generated image to the chat CDN.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageUpload {
    pub file_url: String,

    #[serde(default)]
    pub thumb_url: Option<String>,
}
