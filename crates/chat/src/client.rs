//! REST client for the chat backend.
//!
//! [`StreamChatClient`] holds app-level credentials and the shared HTTP
//! client; [`StreamChannel`] scopes it to one channel and implements the
//! [`ChatApi`] trait the agent runtime works against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use chatrelay_core::error::ChatError;
use chatrelay_core::event::IndicatorEvent;
use chatrelay_core::message::{ChatMessage, ImageUpload, MessageUpdate};
use chatrelay_core::ChatApi;

use crate::token::create_server_token;

/// App-scoped chat backend client.
pub struct StreamChatClient {
    api_key: String,
    base_url: String,
    server_token: String,
    client: reqwest::Client,
}

impl StreamChatClient {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: &str,
        base_url: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            server_token: create_server_token(api_secret)?,
            client,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Scope this client to one channel, acting as `bot_user_id`.
    pub fn channel(
        self: &Arc<Self>,
        channel_type: impl Into<String>,
        channel_id: impl Into<String>,
        bot_user_id: impl Into<String>,
    ) -> StreamChannel {
        let channel_type = channel_type.into();
        let channel_id = channel_id.into();
        StreamChannel {
            cid: format!("{channel_type}:{channel_id}"),
            channel_type,
            channel_id,
            bot_user_id: bot_user_id.into(),
            client: Arc::clone(self),
        }
    }

    /// Create or update a user record.
    pub async fn upsert_user(&self, user_id: &str, name: &str) -> Result<(), ChatError> {
        let body = serde_json::json!({
            "users": { user_id: { "id": user_id, "name": name, "role": "admin" } }
        });
        self.post("/users", &body).await.map(drop)
    }

    /// Add members to a channel.
    pub async fn add_members(
        &self,
        channel_type: &str,
        channel_id: &str,
        user_ids: &[&str],
    ) -> Result<(), ChatError> {
        let body = serde_json::json!({ "add_members": user_ids });
        self.post(&format!("/channels/{channel_type}/{channel_id}"), &body)
            .await
            .map(drop)
    }

    /// Remove members from a channel.
    pub async fn remove_members(
        &self,
        channel_type: &str,
        channel_id: &str,
        user_ids: &[&str],
    ) -> Result<(), ChatError> {
        let body = serde_json::json!({ "remove_members": user_ids });
        self.post(&format!("/channels/{channel_type}/{channel_id}"), &body)
            .await
            .map(drop)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}?api_key={}", self.base_url, path, self.api_key)
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ChatError> {
        debug!(path, "chat api request");
        let response = self
            .client
            .post(self.url(path))
            .header("Authorization", &self.server_token)
            .header("stream-auth-type", "jwt")
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::ConnectionLost(e.to_string()))?;
        Self::check(response).await
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "chat api returned error");
            return Err(ChatError::ApiError {
                status_code: status,
                message,
            });
        }
        Ok(response)
    }
}

/// A channel-scoped handle implementing [`ChatApi`].
pub struct StreamChannel {
    cid: String,
    channel_type: String,
    channel_id: String,
    bot_user_id: String,
    client: Arc<StreamChatClient>,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct UploadEnvelope {
    file: String,
    #[serde(default)]
    thumb_url: Option<String>,
}

#[async_trait]
impl ChatApi for StreamChannel {
    fn cid(&self) -> &str {
        &self.cid
    }

    async fn create_ai_message(
        &self,
        parent_id: Option<&str>,
    ) -> Result<ChatMessage, ChatError> {
        let mut message = serde_json::json!({
            "text": "",
            "ai_generated": true,
            "user_id": self.bot_user_id,
        });
        if let Some(parent_id) = parent_id {
            message["parent_id"] = serde_json::json!(parent_id);
        }
        let body = serde_json::json!({ "message": message });

        let path = format!("/channels/{}/{}/message", self.channel_type, self.channel_id);
        let response = self.client.post(&path, &body).await?;
        let envelope: MessageEnvelope =
            response
                .json()
                .await
                .map_err(|e| ChatError::InvalidPayload(format!(
                    "failed to parse message response: {e}"
                )))?;
        Ok(envelope.message)
    }

    async fn partial_update_message(
        &self,
        message_id: &str,
        update: &MessageUpdate,
    ) -> Result<(), ChatError> {
        let body = serde_json::json!({
            "set": update,
            "user_id": self.bot_user_id,
        });
        self.client
            .post(&format!("/messages/{message_id}"), &body)
            .await
            .map(drop)
            .map_err(|e| match e {
                ChatError::ApiError { status_code, message } => ChatError::DeliveryFailed {
                    message_id: message_id.to_string(),
                    reason: format!("status {status_code}: {message}"),
                },
                other => other,
            })
    }

    async fn send_event(&self, event: &IndicatorEvent) -> Result<(), ChatError> {
        let mut event_json = serde_json::to_value(event)
            .map_err(|e| ChatError::InvalidPayload(e.to_string()))?;
        event_json["user_id"] = serde_json::json!(self.bot_user_id);
        let body = serde_json::json!({ "event": event_json });

        let path = format!("/channels/{}/{}/event", self.channel_type, self.channel_id);
        self.client.post(&path, &body).await.map(drop)
    }

    async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<ImageUpload, ChatError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|e| ChatError::InvalidPayload(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("user_id", self.bot_user_id.clone());

        let path = format!("/channels/{}/{}/image", self.channel_type, self.channel_id);
        let response = self
            .client
            .client
            .post(self.client.url(&path))
            .header("Authorization", &self.client.server_token)
            .header("stream-auth-type", "jwt")
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChatError::ConnectionLost(e.to_string()))?;
        let response = StreamChatClient::check(response).await?;

        let envelope: UploadEnvelope =
            response
                .json()
                .await
                .map_err(|e| ChatError::InvalidPayload(format!(
                    "failed to parse upload response: {e}"
                )))?;
        Ok(ImageUpload {
            file_url: envelope.file,
            thumb_url: envelope.thumb_url,
        })
    }
}
