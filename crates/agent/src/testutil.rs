//! In-memory fakes for the agent runtime tests. No network anywhere.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use chatrelay_core::error::{ChatError, ProviderError};
use chatrelay_core::event::IndicatorEvent;
use chatrelay_core::message::{ChatMessage, ImageUpload, MessageUpdate};
use chatrelay_core::provider::{ChatModel, EventStream, ResponseEvent, ToolDefinition, TurnInput};
use chatrelay_core::{ChatApi, EventListener, Tool};

/// Records every call; message ids are `ai-msg-{n}` unless pinned.
pub struct MockChat {
    cid: String,
    next_id: AtomicUsize,
    fixed_message_id: Mutex<Option<String>>,
    fail_updates: AtomicBool,
    pub created: Mutex<Vec<ChatMessage>>,
    pub updates: Mutex<Vec<MessageUpdate>>,
    pub events: Mutex<Vec<IndicatorEvent>>,
    pub uploads: Mutex<Vec<(String, String)>>,
}

impl MockChat {
    pub fn new(cid: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            next_id: AtomicUsize::new(1),
            fixed_message_id: Mutex::new(None),
            fail_updates: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Every created message gets this id.
    pub fn pin_message_id(&self, id: impl Into<String>) {
        *self.fixed_message_id.lock().unwrap() = Some(id.into());
    }

    pub fn fail_partial_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatApi for MockChat {
    fn cid(&self) -> &str {
        &self.cid
    }

    async fn create_ai_message(&self, parent_id: Option<&str>) -> Result<ChatMessage, ChatError> {
        let id = self
            .fixed_message_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("ai-msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        let message = ChatMessage {
            id,
            ai_generated: true,
            parent_id: parent_id.map(str::to_string),
            ..Default::default()
        };
        self.created.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn partial_update_message(
        &self,
        _message_id: &str,
        update: &MessageUpdate,
    ) -> Result<(), ChatError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(ChatError::DeliveryFailed {
                message_id: _message_id.to_string(),
                reason: "update refused".into(),
            });
        }
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn send_event(&self, event: &IndicatorEvent) -> Result<(), ChatError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn upload_image(
        &self,
        _bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<ImageUpload, ChatError> {
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_string(), mime_type.to_string()));
        Ok(ImageUpload {
            file_url: "https://cdn.test/generated.png".into(),
            thumb_url: Some("https://cdn.test/generated-thumb.png".into()),
        })
    }
}

type Script = Vec<Result<ResponseEvent, ProviderError>>;

/// Plays back pre-written event streams, one script per `start_turn` or
/// `continue_turn`, in order.
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    configured: bool,
    images: bool,
    hold_open: bool,
    hang_image: bool,
    image_bytes: Mutex<Option<Vec<u8>>>,
    held: Mutex<Vec<mpsc::Sender<Result<ResponseEvent, ProviderError>>>>,
    pub starts: Mutex<Vec<TurnInput>>,
    pub continuations: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedModel {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            configured: true,
            images: false,
            hold_open: false,
            hang_image: false,
            image_bytes: Mutex::new(None),
            held: Mutex::new(Vec::new()),
            starts: Mutex::new(Vec::new()),
            continuations: Mutex::new(Vec::new()),
        }
    }

    /// Keep each stream's sender alive after the script drains, so the
    /// receiver blocks instead of observing end-of-stream.
    pub fn hold_stream_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn supporting_images(mut self) -> Self {
        self.images = true;
        self
    }

    pub fn with_image_bytes(self, bytes: Vec<u8>) -> Self {
        *self.image_bytes.lock().unwrap() = Some(bytes);
        self
    }

    /// `generate_image` never resolves; pair with a stop.
    pub fn with_hanging_image_generation(mut self) -> Self {
        self.hang_image = true;
        self
    }

    fn next_stream(&self) -> Result<EventStream, ProviderError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::StreamInterrupted("no scripted stream left".into()))?;
        let (tx, rx) = mpsc::channel(64);
        for event in script {
            let _ = tx.try_send(event);
        }
        if self.hold_open {
            self.held.lock().unwrap().push(tx);
        }
        Ok(rx)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn supports_images(&self) -> bool {
        self.images
    }

    async fn start_turn(&self, input: TurnInput) -> Result<EventStream, ProviderError> {
        self.starts.lock().unwrap().push(input);
        self.next_stream()
    }

    async fn continue_turn(
        &self,
        previous_response_id: &str,
        call_id: &str,
        output: &str,
        _tools: &[ToolDefinition],
    ) -> Result<EventStream, ProviderError> {
        self.continuations.lock().unwrap().push((
            previous_response_id.to_string(),
            call_id.to_string(),
            output.to_string(),
        ));
        self.next_stream()
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Vec<u8>, ProviderError> {
        if self.hang_image {
            std::future::pending::<()>().await;
        }
        self.image_bytes
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("no scripted image".into()))
    }
}

/// A tool that always returns the same output and records its arguments.
pub struct FixedTool {
    name: String,
    output: String,
    pub calls: Mutex<Vec<String>>,
}

impl FixedTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Tool for FixedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: "test tool".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            strict: false,
        }
    }

    async fn invoke(&self, arguments_json: &str) -> String {
        self.calls.lock().unwrap().push(arguments_json.to_string());
        self.output.clone()
    }
}

/// Listener stub that only counts lifecycle calls.
#[derive(Default)]
pub struct NoopListener {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

#[async_trait]
impl EventListener for NoopListener {
    async fn start(&self) -> Result<(), ChatError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
