//! Agent trait and bot identity helpers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::Result;

/// A per-channel AI agent the registry can manage.
#[async_trait]
pub trait AiAgent: Send + Sync {
    /// Bring the agent online: verify credentials, open the realtime
    /// connection, start dispatching events. Fails fast when the model
    /// backend has no credential.
    async fn init(&self) -> Result<()>;

    /// Tear the agent down: stop the listener, cancel and await every live
    /// response handler. Idempotent.
    async fn dispose(&self);

    /// Monotonic timestamp of the last user message this agent served.
    fn last_interaction(&self) -> Instant;
}

/// Which model backend serves a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPlatform {
    #[default]
    OpenAi,
    Anthropic,
}

impl AgentPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPlatform::OpenAi => "openai",
            AgentPlatform::Anthropic => "anthropic",
        }
    }
}

/// Derive the bot user id for a channel.
///
/// `!` appears in distinct-channel ids and is not valid in user ids.
pub fn bot_user_id(channel_id: &str) -> String {
    format!("ai-bot-{}", channel_id.replace('!', ""))
}

/// Strip a `type:` prefix from a composite channel id.
pub fn normalize_channel_id(raw: &str) -> String {
    let raw = raw.trim();
    match raw.split_once(':') {
        Some((_, id)) if !id.is_empty() => id.to_string(),
        _ => raw.to_string(),
    }
}
