//! Realtime chat events — the wire vocabulary of the websocket listener and
//! the AI typing indicator.
//!
//! Inbound frames are a tagged union discriminated by the `type` field; any
//! event type this runtime does not act on collapses into [`ChatEvent::Other`]
//! so unknown traffic never fails decoding.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;

/// An event received over the realtime websocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// A user posted a message in a channel the bot watches.
    #[serde(rename = "message.new")]
    MessageNew {
        #[serde(default)]
        cid: Option<String>,
        #[serde(default)]
        message: Option<ChatMessage>,
    },

    /// The user asked the UI to stop an in-flight generation.
    #[serde(rename = "ai_indicator.stop")]
    IndicatorStop {
        #[serde(default)]
        cid: Option<String>,
        #[serde(default)]
        message_id: Option<String>,
    },

    /// Server-side keepalive. Dropped by the listener.
    #[serde(rename = "health.check")]
    HealthCheck,

    /// Reply to a client ping. Dropped by the listener.
    #[serde(rename = "pong")]
    Pong,

    /// Anything else on the wire.
    #[serde(other)]
    Other,
}

impl ChatEvent {
    /// Connection-maintenance frames that never reach an agent.
    pub fn is_control(&self) -> bool {
        matches!(self, ChatEvent::HealthCheck | ChatEvent::Pong)
    }
}

/// Phase of an in-flight AI response, as mirrored to the channel UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    #[serde(rename = "AI_STATE_THINKING")]
    Thinking,
    #[serde(rename = "AI_STATE_GENERATING")]
    Generating,
    #[serde(rename = "AI_STATE_EXTERNAL_SOURCES")]
    ExternalSources,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

/// An indicator event the bot sends into a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IndicatorEvent {
    #[serde(rename = "ai_indicator.update")]
    Update {
        cid: String,
        message_id: String,
        ai_state: AiState,
    },

    #[serde(rename = "ai_indicator.clear")]
    Clear { cid: String, message_id: String },
}

impl IndicatorEvent {
    pub fn update(cid: impl Into<String>, message_id: impl Into<String>, state: AiState) -> Self {
        IndicatorEvent::Update {
            cid: cid.into(),
            message_id: message_id.into(),
            ai_state: state,
        }
    }

    pub fn clear(cid: impl Into<String>, message_id: impl Into<String>) -> Self {
        IndicatorEvent::Clear {
            cid: cid.into(),
            message_id: message_id.into(),
        }
    }
}
