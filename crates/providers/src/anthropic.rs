//! Anthropic Messages API backend.
//!
//! Text-only: no server-side turn chaining, no tool continuation, no image
//! generation. Prompt context is replayed as plain-text messages each turn
//! and streaming frames are mapped into the shared event vocabulary.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use chatrelay_core::error::ProviderError;
use chatrelay_core::provider::{ChatModel, EventStream, ResponseEvent, Role, TurnInput};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// An Anthropic Messages API client.
pub struct AnthropicMessagesClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicMessagesClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Split the prompt context into the `system` string and the
    /// user/assistant message list the Messages API expects.
    fn to_api_request(input: &TurnInput) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system = String::new();
        let mut messages = Vec::new();

        for message in &input.messages {
            let text = message.plain_text();
            if text.is_empty() {
                continue;
            }
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&text);
                }
                Role::User => messages.push(serde_json::json!({
                    "role": "user",
                    "content": text,
                })),
                Role::Assistant => messages.push(serde_json::json!({
                    "role": "assistant",
                    "content": text,
                })),
            }
        }

        let system = (!system.is_empty()).then_some(system);
        (system, messages)
    }
}

#[async_trait]
impl ChatModel for AnthropicMessagesClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn start_turn(&self, input: TurnInput) -> Result<EventStream, ProviderError> {
        let (system, messages) = Self::to_api_request(&input);

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "stream": true,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }

        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, "Sending streaming messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Messages API returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    match serde_json::from_str::<WireEvent>(data.trim()) {
                        Ok(wire) => match map_event(wire) {
                            Some(Ok(event)) => {
                                let done = event == ResponseEvent::Completed;
                                if tx.send(Ok(event)).await.is_err() || done {
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                            None => {}
                        },
                        Err(e) => {
                            trace!(data = %data, error = %e, "Ignoring unparseable SSE frame");
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Map a Messages frame into the normalized event vocabulary.
fn map_event(wire: WireEvent) -> Option<Result<ResponseEvent, ProviderError>> {
    match wire {
        WireEvent::MessageStart { message } => Some(Ok(ResponseEvent::Created {
            response_id: message.id,
        })),
        WireEvent::ContentBlockDelta { delta } => match delta {
            WireDelta::TextDelta { text } => Some(Ok(ResponseEvent::TextDelta { delta: text })),
            WireDelta::Other => None,
        },
        WireEvent::MessageStop => Some(Ok(ResponseEvent::Completed)),
        WireEvent::Error { error } => Some(Err(ProviderError::StreamInterrupted(
            error
                .map(|e| e.message)
                .unwrap_or_else(|| "stream error".into()),
        ))),
        WireEvent::Other => None,
    }
}

// --- Messages API wire types (internal) ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: WireMessage },

    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: WireDelta },

    #[serde(rename = "message_stop")]
    MessageStop,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<WireError>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::provider::PromptMessage;

    #[test]
    fn constructor_defaults() {
        let client = AnthropicMessagesClient::new("sk-ant-test");
        assert_eq!(client.name(), "anthropic");
        assert!(client.is_configured());
        assert!(!client.supports_images());
    }

    #[tokio::test]
    async fn continuation_is_not_supported() {
        let client = AnthropicMessagesClient::new("sk-ant-test");
        let result = client.continue_turn("resp_1", "call_1", "output", &[]).await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn system_messages_lift_to_system_field() {
        let input = TurnInput {
            messages: vec![
                PromptMessage::text(Role::System, "Be helpful."),
                PromptMessage::text(Role::User, "hi"),
                PromptMessage::text(Role::Assistant, "hello"),
            ],
            ..Default::default()
        };
        let (system, messages) = AnthropicMessagesClient::to_api_request(&input);
        assert_eq!(system.as_deref(), Some("Be helpful."));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn empty_messages_are_skipped() {
        let input = TurnInput {
            messages: vec![PromptMessage::text(Role::User, "")],
            ..Default::default()
        };
        let (system, messages) = AnthropicMessagesClient::to_api_request(&input);
        assert!(system.is_none());
        assert!(messages.is_empty());
    }

    fn map(data: &str) -> Option<Result<ResponseEvent, ProviderError>> {
        map_event(serde_json::from_str::<WireEvent>(data).unwrap())
    }

    #[test]
    fn message_start_maps_to_created() {
        let event = map(r#"{"type":"message_start","message":{"id":"msg_1","role":"assistant"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ResponseEvent::Created {
                response_id: "msg_1".into()
            }
        );
    }

    #[test]
    fn text_delta_maps() {
        let event = map(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event, ResponseEvent::TextDelta { delta: "Hi".into() });
    }

    #[test]
    fn message_stop_maps_to_completed() {
        let event = map(r#"{"type":"message_stop"}"#).unwrap().unwrap();
        assert_eq!(event, ResponseEvent::Completed);
    }

    #[test]
    fn ping_and_block_boundaries_are_ignored() {
        assert!(map(r#"{"type":"ping"}"#).is_none());
        assert!(
            map(r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#)
                .is_none()
        );
        assert!(map(r#"{"type":"content_block_stop","index":0}"#).is_none());
    }

    #[test]
    fn error_frame_maps() {
        let result =
            map(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
                .unwrap();
        assert!(matches!(
            result,
            Err(ProviderError::StreamInterrupted(m)) if m == "Overloaded"
        ));
    }
}
