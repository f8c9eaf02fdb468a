//! Per-message response handler — the streaming turn state machine.
//!
//! One handler owns one AI placeholder message for exactly one turn. Text
//! turns loop over `{stream, optional pending tool continuation}` until the
//! backend completes with nothing pending; image turns run the generate →
//! upload → attach pipeline. Whatever the exit path (completion, provider
//! error, user stop), the handler finalizes exactly once: final partial
//! update with `generating = false`, indicator clear, one [`TurnOutcome`]
//! sent to the owning agent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chatrelay_core::error::Error;
use chatrelay_core::event::{AiState, IndicatorEvent};
use chatrelay_core::message::{MessageAttachment, MessageUpdate};
use chatrelay_core::provider::{ChatModel, ResponseEvent, TurnInput};
use chatrelay_core::{ChatApi, Tool, tool};

use crate::image;

/// What a finished turn reports back to the agent.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message_id: String,

    /// Final assistant text. Empty on error turns and stopped image turns.
    pub text: String,

    /// Server-side anchor of the last response, for chained turns.
    pub response_id: Option<String>,
}

/// Everything a handler needs to run one turn.
pub struct HandlerContext {
    pub chat: Arc<dyn ChatApi>,
    pub model: Arc<dyn ChatModel>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub message_id: String,
    pub input: TurnInput,
}

pub struct ResponseHandler {
    inner: Arc<HandlerInner>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

struct HandlerInner {
    chat: Arc<dyn ChatApi>,
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    message_id: String,
    input: TurnInput,

    /// Serializes partial updates so flushed text is monotonic.
    update_lock: tokio::sync::Mutex<()>,

    /// Last indicator state sent; repeated sets are suppressed.
    indicator: std::sync::Mutex<Option<AiState>>,

    indicator_cleared: AtomicBool,
    finalized: AtomicBool,
    outcomes: mpsc::Sender<TurnOutcome>,
}

impl ResponseHandler {
    pub fn new(ctx: HandlerContext, outcomes: mpsc::Sender<TurnOutcome>) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                chat: ctx.chat,
                model: ctx.model,
                tools: ctx.tools,
                message_id: ctx.message_id,
                input: ctx.input,
                update_lock: tokio::sync::Mutex::new(()),
                indicator: std::sync::Mutex::new(None),
                indicator_cleared: AtomicBool::new(false),
                finalized: AtomicBool::new(false),
                outcomes,
            }),
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.inner.message_id
    }

    /// Spawn the turn task. Idempotent.
    pub async fn start(&self) {
        let mut guard = self.task.lock().await;
        if guard.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        *guard = Some(tokio::spawn(async move {
            if image::wants_image(&inner.input) && inner.model.supports_images() {
                run_image(&inner, &cancel).await;
            } else {
                run_text(&inner, &cancel).await;
            }
        }));
    }

    /// Cancel the turn and wait for it to finalize. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(message_id = %self.inner.message_id, error = %e, "handler task ended abnormally");
        }
    }
}

enum TurnAbort {
    Cancelled,
    Failed(Error),
}

struct PendingCall {
    call_id: String,
    output: String,
    anchor: String,
}

async fn run_text(inner: &HandlerInner, cancel: &CancellationToken) {
    let mut buffer = String::new();
    let mut response_id = inner.input.previous_response_id.clone();

    match stream_turn(inner, cancel, &mut buffer, &mut response_id).await {
        // A stop keeps whatever text already streamed, same as completion.
        Ok(()) | Err(TurnAbort::Cancelled) => {
            let text = buffer;
            inner
                .finalize(MessageUpdate::finished(text.clone()), text, response_id)
                .await;
        }
        Err(TurnAbort::Failed(error)) => {
            warn!(message_id = %inner.message_id, error = %error, "text turn failed");
            inner.set_indicator(AiState::Error).await;
            inner
                .finalize(
                    MessageUpdate::finished(format!("Error: {error}")),
                    String::new(),
                    response_id,
                )
                .await;
        }
    }
}

/// The text-mode event loop.
///
/// Tool continuations are queued and drained one at a time: each completed
/// function call becomes one `continue_turn` stream, and a continuation
/// stream may queue further calls. The loop exits when a stream completes
/// with nothing pending.
async fn stream_turn(
    inner: &HandlerInner,
    cancel: &CancellationToken,
    buffer: &mut String,
    response_id: &mut Option<String>,
) -> Result<(), TurnAbort> {
    let mut queue: VecDeque<PendingCall> = VecDeque::new();
    // item_id -> (function name, call_id)
    let mut calls: HashMap<String, (String, String)> = HashMap::new();
    let mut arguments: HashMap<String, String> = HashMap::new();

    let mut rx = inner
        .model
        .start_turn(inner.input.clone())
        .await
        .map_err(|e| TurnAbort::Failed(e.into()))?;

    loop {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(TurnAbort::Cancelled),
                event = rx.recv() => event,
            };
            // A closed stream without Completed still ends the turn.
            let Some(event) = event else { break };
            let event = event.map_err(|e| TurnAbort::Failed(e.into()))?;

            match event {
                ResponseEvent::Created { response_id: id } => {
                    *response_id = Some(id);
                }
                ResponseEvent::TextDelta { delta } => {
                    inner.set_indicator(AiState::Generating).await;
                    buffer.push_str(&delta);
                    inner.flush(buffer).await.map_err(TurnAbort::Failed)?;
                }
                ResponseEvent::FunctionCallStarted {
                    item_id,
                    name,
                    call_id,
                } => {
                    inner.set_indicator(AiState::ExternalSources).await;
                    calls.insert(item_id, (name, call_id));
                }
                ResponseEvent::FunctionArgumentsDelta { item_id, delta } => {
                    arguments.entry(item_id).or_default().push_str(&delta);
                }
                ResponseEvent::FunctionArgumentsDone { item_id } => {
                    let args = arguments.remove(&item_id).unwrap_or_else(|| "{}".into());
                    let Some((name, call_id)) = calls.remove(&item_id) else {
                        continue;
                    };
                    let output = tokio::select! {
                        _ = cancel.cancelled() => return Err(TurnAbort::Cancelled),
                        output = tool::dispatch(&inner.tools, &name, &args) => output,
                    };
                    match response_id.clone() {
                        Some(anchor) => queue.push_back(PendingCall {
                            call_id,
                            output,
                            anchor,
                        }),
                        None => warn!(function = %name, "function call without a response anchor"),
                    }
                }
                ResponseEvent::Completed => break,
            }
        }

        let Some(pending) = queue.pop_front() else {
            return Ok(());
        };

        debug!(
            message_id = %inner.message_id,
            call_id = %pending.call_id,
            "submitting function call output"
        );
        rx = inner
            .model
            .continue_turn(
                &pending.anchor,
                &pending.call_id,
                &pending.output,
                &inner.input.tools,
            )
            .await
            .map_err(|e| TurnAbort::Failed(e.into()))?;
    }
}

async fn run_image(inner: &HandlerInner, cancel: &CancellationToken) {
    let prompt = image::image_prompt(&inner.input);
    inner.set_indicator(AiState::Generating).await;

    let result = tokio::select! {
        _ = cancel.cancelled() => Err(TurnAbort::Cancelled),
        result = image_flow(inner, &prompt) => result,
    };

    match result {
        Ok((caption, attachment)) => {
            inner
                .finalize(
                    MessageUpdate::finished(caption.clone()).with_attachments(vec![attachment]),
                    caption,
                    None,
                )
                .await;
        }
        Err(TurnAbort::Cancelled) => {
            inner
                .finalize(
                    MessageUpdate::finished("Image generation stopped.").with_attachments(vec![]),
                    String::new(),
                    None,
                )
                .await;
        }
        Err(TurnAbort::Failed(error)) => {
            warn!(message_id = %inner.message_id, error = %error, "image turn failed");
            inner.set_indicator(AiState::Error).await;
            inner
                .finalize(
                    MessageUpdate::finished(format!("Error: {error}")),
                    String::new(),
                    None,
                )
                .await;
        }
    }
}

async fn image_flow(
    inner: &HandlerInner,
    prompt: &str,
) -> Result<(String, MessageAttachment), TurnAbort> {
    let bytes = inner
        .model
        .generate_image(prompt)
        .await
        .map_err(|e| TurnAbort::Failed(e.into()))?;
    let upload = inner
        .chat
        .upload_image(bytes, "generated-image.png", "image/png")
        .await
        .map_err(|e| TurnAbort::Failed(e.into()))?;

    let caption = format!("Generated image for prompt: \"{prompt}\"");
    let attachment = MessageAttachment::image(upload.file_url, prompt);
    Ok((caption, attachment))
}

impl HandlerInner {
    /// Emit an indicator update, suppressing repeats of the current state.
    /// Indicator failures degrade the turn, never abort it.
    async fn set_indicator(&self, state: AiState) {
        {
            let mut current = self.indicator.lock().expect("indicator lock poisoned");
            if *current == Some(state) {
                return;
            }
            *current = Some(state);
        }
        let event = IndicatorEvent::update(self.chat.cid(), &self.message_id, state);
        if let Err(e) = self.chat.send_event(&event).await {
            debug!(message_id = %self.message_id, error = %e, "failed to send indicator update");
        }
    }

    async fn clear_indicator(&self) {
        if self.indicator_cleared.swap(true, Ordering::SeqCst) {
            return;
        }
        let event = IndicatorEvent::clear(self.chat.cid(), &self.message_id);
        if let Err(e) = self.chat.send_event(&event).await {
            debug!(message_id = %self.message_id, error = %e, "failed to clear indicator");
        }
    }

    /// Push the accumulated buffer into the placeholder message.
    async fn flush(&self, buffer: &str) -> Result<(), Error> {
        let _guard = self.update_lock.lock().await;
        self.chat
            .partial_update_message(&self.message_id, &MessageUpdate::streaming(buffer))
            .await?;
        Ok(())
    }

    /// The exactly-once terminal transition.
    async fn finalize(&self, update: MessageUpdate, outcome_text: String, response_id: Option<String>) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let _guard = self.update_lock.lock().await;
            if let Err(e) = self.chat.partial_update_message(&self.message_id, &update).await {
                warn!(message_id = %self.message_id, error = %e, "final message update failed");
            }
        }

        self.clear_indicator().await;

        let _ = self
            .outcomes
            .send(TurnOutcome {
                message_id: self.message_id.clone(),
                text: outcome_text,
                response_id,
            })
            .await;
    }
}
