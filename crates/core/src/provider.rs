//! ChatModel trait — the abstraction over streaming LLM backends.
//!
//! A model backend turns a prompt into a stream of [`ResponseEvent`]s. The
//! two wire protocols this runtime speaks (OpenAI Responses, Anthropic
//! Messages) are incompatible on the wire, so both are normalized into the
//! same event vocabulary here and everything above the provider crates is
//! backend-agnostic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;

/// The role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One part of a prompt message's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    Text { text: String },

    #[serde(rename = "input_image")]
    Image { image_url: String, detail: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        ContentPart::Image {
            image_url: image_url.into(),
            detail: "auto".into(),
        }
    }
}

/// A single message in the prompt context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl PromptMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Concatenated text parts, for backends that take plain strings.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let ContentPart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// A function the model may call during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,

    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,

    /// Whether the backend should enforce the schema exactly.
    #[serde(default)]
    pub strict: bool,
}

/// Everything a backend needs to start one response turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub messages: Vec<PromptMessage>,
    pub tools: Vec<ToolDefinition>,

    /// Server-side anchor of the previous response, when the backend
    /// supports chained turns.
    pub previous_response_id: Option<String>,
}

/// A normalized streaming event from a model backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// The backend accepted the turn and assigned it an id.
    Created { response_id: String },

    /// An incremental piece of assistant text.
    TextDelta { delta: String },

    /// The model started emitting a function call.
    FunctionCallStarted {
        item_id: String,
        name: String,
        call_id: String,
    },

    /// An incremental piece of a function call's JSON arguments.
    FunctionArgumentsDelta { item_id: String, delta: String },

    /// The function call's arguments are complete.
    FunctionArgumentsDone { item_id: String },

    /// The turn finished.
    Completed,
}

/// The receiving end of one response turn.
///
/// Backends push events from a spawned task; transport and protocol failures
/// arrive in-band as `Err` items and terminate the stream.
pub type EventStream = mpsc::Receiver<std::result::Result<ResponseEvent, ProviderError>>;

/// A streaming LLM backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    /// Whether the constructed client holds a usable credential.
    fn is_configured(&self) -> bool;

    /// Whether this backend can generate images.
    fn supports_images(&self) -> bool {
        false
    }

    /// Start a response turn.
    async fn start_turn(&self, input: TurnInput) -> std::result::Result<EventStream, ProviderError>;

    /// Resume a turn by submitting one function call's output, anchored to
    /// the response that requested it.
    async fn continue_turn(
        &self,
        previous_response_id: &str,
        call_id: &str,
        output: &str,
        tools: &[ToolDefinition],
    ) -> std::result::Result<EventStream, ProviderError> {
        let _ = (previous_response_id, call_id, output, tools);
        Err(ProviderError::NotConfigured(format!(
            "{} does not support tool continuation",
            self.name()
        )))
    }

    /// Generate an image for a prompt, returning raw PNG bytes.
    async fn generate_image(&self, prompt: &str) -> std::result::Result<Vec<u8>, ProviderError> {
        let _ = prompt;
        Err(ProviderError::NotConfigured(format!(
            "{} does not support image generation",
            self.name()
        )))
    }
}
