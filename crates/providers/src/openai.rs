//! OpenAI Responses API backend.
//!
//! Speaks the streaming Responses protocol: one POST per turn, SSE frames
//! back. Tool continuations are chained server-side through
//! `previous_response_id` plus a `function_call_output` item, so no
//! transcript replay is needed. Also drives the images endpoint for image
//! turns.

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use chatrelay_core::error::ProviderError;
use chatrelay_core::provider::{
    ChatModel, EventStream, ResponseEvent, ToolDefinition, TurnInput,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const IMAGE_MODEL: &str = "gpt-image-1";

/// An OpenAI Responses API client.
pub struct OpenAiResponsesClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiResponsesClient {
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

    /// Convert tool definitions to the flat Responses API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                    "strict": t.strict,
                })
            })
            .collect()
    }

    /// POST a streaming turn request and spawn the SSE reader task.
    async fn stream_events(
        &self,
        body: serde_json::Value,
    ) -> Result<EventStream, ProviderError> {
        let url = format!("{}/responses", self.base_url);
        debug!(model = %self.model, "Sending streaming responses request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            warn!(status, body = %error_body, "Responses API returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Spawn task to read the SSE byte stream and parse frames
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

                // Process complete lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    // Skip blanks, SSE comments, and `event:` name lines;
                    // the data payload repeats the type.
                    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<WireEvent>(data) {
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

#[async_trait]
impl ChatModel for OpenAiResponsesClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn supports_images(&self) -> bool {
        true
    }

    async fn start_turn(&self, input: TurnInput) -> Result<EventStream, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": input.messages,
            "stream": true,
        });
        if !input.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&input.tools));
        }
        if let Some(previous) = &input.previous_response_id {
            body["previous_response_id"] = serde_json::json!(previous);
        }
        self.stream_events(body).await
    }

    async fn continue_turn(
        &self,
        previous_response_id: &str,
        call_id: &str,
        output: &str,
        tools: &[ToolDefinition],
    ) -> Result<EventStream, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": [{
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }],
            "previous_response_id": previous_response_id,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(tools));
        }
        self.stream_events(body).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let url = format!("{}/images/generations", self.base_url);
        let body = serde_json::json!({
            "model": IMAGE_MODEL,
            "prompt": prompt,
            "size": "1024x1024",
        });

        debug!("Sending image generation request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let parsed: ImageResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse image response: {e}"),
            })?;

        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No image in response".into(),
            })?;

        base64::engine::general_purpose::STANDARD
            .decode(first.b64_json)
            .map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Invalid base64 image payload: {e}"),
            })
    }
}

/// Map a wire frame into the normalized event vocabulary.
///
/// `None` means the frame carries nothing the state machine acts on.
fn map_event(wire: WireEvent) -> Option<Result<ResponseEvent, ProviderError>> {
    match wire {
        WireEvent::Created { response } => Some(Ok(ResponseEvent::Created {
            response_id: response.id,
        })),
        WireEvent::OutputItemAdded { item } => {
            if item.kind.as_deref() == Some("function_call") {
                Some(Ok(ResponseEvent::FunctionCallStarted {
                    item_id: item.id.unwrap_or_default(),
                    name: item.name.unwrap_or_default(),
                    call_id: item.call_id.unwrap_or_default(),
                }))
            } else {
                None
            }
        }
        WireEvent::OutputTextDelta { delta } => Some(Ok(ResponseEvent::TextDelta { delta })),
        WireEvent::FunctionArgumentsDelta { item_id, delta } => {
            Some(Ok(ResponseEvent::FunctionArgumentsDelta { item_id, delta }))
        }
        WireEvent::FunctionArgumentsDone { item_id } => {
            Some(Ok(ResponseEvent::FunctionArgumentsDone { item_id }))
        }
        WireEvent::Completed => Some(Ok(ResponseEvent::Completed)),
        WireEvent::Error { message } => Some(Err(ProviderError::StreamInterrupted(
            message.unwrap_or_else(|| "stream error".into()),
        ))),
        WireEvent::Other => None,
    }
}

// --- Responses API wire types (internal) ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "response.created")]
    Created { response: WireResponse },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: WireItem },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionArgumentsDelta { item_id: String, delta: String },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionArgumentsDone { item_id: String },

    #[serde(rename = "response.completed")]
    Completed,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::provider::{PromptMessage, Role};

    #[test]
    fn constructor_defaults() {
        let client = OpenAiResponsesClient::new("sk-test");
        assert_eq!(client.name(), "openai");
        assert!(client.is_configured());
        assert!(client.supports_images());
        assert!(client.base_url.contains("api.openai.com"));
    }

    #[test]
    fn empty_key_is_unconfigured() {
        let client = OpenAiResponsesClient::new("");
        assert!(!client.is_configured());
    }

    #[test]
    fn tool_definitions_flatten() {
        let tools = vec![ToolDefinition {
            name: "getCurrentTemperature".into(),
            description: "Get the current temperature".into(),
            parameters: serde_json::json!({"type": "object"}),
            strict: true,
        }];
        let api_tools = OpenAiResponsesClient::to_api_tools(&tools);
        assert_eq!(api_tools[0]["type"], "function");
        assert_eq!(api_tools[0]["name"], "getCurrentTemperature");
        assert_eq!(api_tools[0]["strict"], true);
    }

    #[test]
    fn prompt_messages_serialize_as_input() {
        let messages = vec![PromptMessage::text(Role::User, "hello")];
        let json = serde_json::to_value(&messages).unwrap();
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[0]["content"][0]["type"], "input_text");
        assert_eq!(json[0]["content"][0]["text"], "hello");
    }

    // --- SSE frame mapping tests ---

    fn map(data: &str) -> Option<Result<ResponseEvent, ProviderError>> {
        map_event(serde_json::from_str::<WireEvent>(data).unwrap())
    }

    #[test]
    fn created_frame_maps() {
        let event = map(r#"{"type":"response.created","response":{"id":"resp_1"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ResponseEvent::Created {
                response_id: "resp_1".into()
            }
        );
    }

    #[test]
    fn text_delta_maps() {
        let event = map(r#"{"type":"response.output_text.delta","delta":"Hi"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, ResponseEvent::TextDelta { delta: "Hi".into() });
    }

    #[test]
    fn function_call_item_maps() {
        let event = map(
            r#"{"type":"response.output_item.added","item":{"type":"function_call","id":"item_1","name":"getCurrentTemperature","call_id":"call_1"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            ResponseEvent::FunctionCallStarted {
                item_id: "item_1".into(),
                name: "getCurrentTemperature".into(),
                call_id: "call_1".into(),
            }
        );
    }

    #[test]
    fn non_function_item_is_ignored() {
        assert!(
            map(r#"{"type":"response.output_item.added","item":{"type":"message","id":"m1"}}"#)
                .is_none()
        );
    }

    #[test]
    fn arguments_frames_map() {
        let delta = map(
            r#"{"type":"response.function_call_arguments.delta","item_id":"item_1","delta":"{\"loc"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            delta,
            ResponseEvent::FunctionArgumentsDelta {
                item_id: "item_1".into(),
                delta: "{\"loc".into(),
            }
        );

        let done = map(r#"{"type":"response.function_call_arguments.done","item_id":"item_1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            done,
            ResponseEvent::FunctionArgumentsDone {
                item_id: "item_1".into()
            }
        );
    }

    #[test]
    fn error_frame_maps_to_stream_error() {
        let result = map(r#"{"type":"error","message":"overloaded"}"#).unwrap();
        assert!(matches!(
            result,
            Err(ProviderError::StreamInterrupted(m)) if m == "overloaded"
        ));
    }

    #[test]
    fn unknown_frame_type_is_ignored() {
        assert!(map(r#"{"type":"response.in_progress","response":{"id":"r1"}}"#).is_none());
    }
}
