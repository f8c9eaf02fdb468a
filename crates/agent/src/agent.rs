//! The per-channel agent: event dispatch, conversation history, and turn
//! handler lifecycle.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatrelay_core::agent::AiAgent;
use chatrelay_core::error::{Error, Result};
use chatrelay_core::event::{AiState, ChatEvent, IndicatorEvent};
use chatrelay_core::message::{ChatMessage, UserRef};
use chatrelay_core::provider::{ChatModel, ContentPart, PromptMessage, Role, TurnInput};
use chatrelay_core::{ChatApi, EventListener, Tool};

use crate::handler::{HandlerContext, ResponseHandler, TurnOutcome};

/// Oldest entries are dropped past this many messages.
const HISTORY_CAPACITY: usize = 25;

/// How many history entries go into each prompt.
const CONTEXT_WINDOW: usize = 5;

const SYSTEM_PROMPT: &str = "You are a helpful assistant in a chat channel. \
    Answer concisely and stay on topic. Only call getCurrentTemperature when \
    the user explicitly asks about the current temperature or weather; if the \
    tool returns \"NaN\", tell the user the reading is unavailable instead of \
    inventing a number.";

const IMAGE_ONLY_FALLBACK: &str = "The user sent an image without a description.";

/// Everything needed to assemble a [`ChannelAgent`].
pub struct AgentParams {
    pub bot_user_id: String,
    pub chat: Arc<dyn ChatApi>,
    pub model: Arc<dyn ChatModel>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub listener: Arc<dyn EventListener>,

    /// Decoded realtime events, fed by the listener.
    pub events: mpsc::Receiver<ChatEvent>,
}

/// One agent serving one channel under one bot identity.
pub struct ChannelAgent {
    inner: Arc<AgentInner>,

    /// Taken by the dispatch task on the first `init`.
    receivers: std::sync::Mutex<Option<(mpsc::Receiver<ChatEvent>, mpsc::Receiver<TurnOutcome>)>>,

    dispatch: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

struct AgentInner {
    bot_user_id: String,
    chat: Arc<dyn ChatApi>,
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    listener: Arc<dyn EventListener>,
    outcome_tx: mpsc::Sender<TurnOutcome>,
    last_interaction: std::sync::Mutex<Instant>,
    state: tokio::sync::Mutex<AgentState>,
}

#[derive(Default)]
struct AgentState {
    history: VecDeque<ChatMessage>,

    /// Live turn handlers, keyed by AI message id.
    handlers: HashMap<String, Arc<ResponseHandler>>,

    /// Anchor of the newest completed response, for chained turns.
    last_response_id: Option<String>,
}

impl ChannelAgent {
    pub fn new(params: AgentParams) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(32);
        Self {
            inner: Arc::new(AgentInner {
                bot_user_id: params.bot_user_id,
                chat: params.chat,
                model: params.model,
                tools: params.tools,
                listener: params.listener,
                outcome_tx,
                last_interaction: std::sync::Mutex::new(Instant::now()),
                state: tokio::sync::Mutex::new(AgentState::default()),
            }),
            receivers: std::sync::Mutex::new(Some((params.events, outcome_rx))),
            dispatch: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl AiAgent for ChannelAgent {
    async fn init(&self) -> Result<()> {
        if !self.inner.model.is_configured() {
            return Err(Error::Config {
                message: format!("no API key for model backend '{}'", self.inner.model.name()),
            });
        }

        let Some((events, outcomes)) = self.receivers.lock().expect("receivers lock poisoned").take()
        else {
            return Ok(());
        };

        self.inner.listener.start().await?;

        let inner = Arc::clone(&self.inner);
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            dispatch_loop(inner, events, outcomes, loop_cancel).await;
        });
        *self.dispatch.lock().await = Some((cancel, handle));

        info!(bot = %self.inner.bot_user_id, cid = %self.inner.chat.cid(), "agent online");
        Ok(())
    }

    async fn dispose(&self) {
        self.inner.listener.stop().await;

        if let Some((cancel, handle)) = self.dispatch.lock().await.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(bot = %self.inner.bot_user_id, error = %e, "dispatch task ended abnormally");
            }
        }

        let handlers: Vec<Arc<ResponseHandler>> = {
            let mut state = self.inner.state.lock().await;
            state.handlers.drain().map(|(_, h)| h).collect()
        };
        for handler in handlers {
            handler.stop().await;
        }

        info!(bot = %self.inner.bot_user_id, "agent disposed");
    }

    fn last_interaction(&self) -> Instant {
        *self
            .inner
            .last_interaction
            .lock()
            .expect("last_interaction lock poisoned")
    }
}

async fn dispatch_loop(
    inner: Arc<AgentInner>,
    mut events: mpsc::Receiver<ChatEvent>,
    mut outcomes: mpsc::Receiver<TurnOutcome>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => {
                let Some(event) = event else { return };
                match event {
                    ChatEvent::MessageNew { message: Some(message), .. } => {
                        inner.handle_new_message(message).await;
                    }
                    ChatEvent::MessageNew { message: None, .. } => {
                        debug!("message.new without a message payload");
                    }
                    ChatEvent::IndicatorStop { message_id, .. } => {
                        inner.handle_stop(message_id).await;
                    }
                    _ => {}
                }
            }
            outcome = outcomes.recv() => {
                // outcome_tx lives in inner, so this arm never sees None
                // while the loop runs.
                if let Some(outcome) = outcome {
                    inner.handle_outcome(outcome).await;
                }
            }
        }
    }
}

impl AgentInner {
    async fn handle_new_message(&self, message: ChatMessage) {
        if message.is_from_bot() {
            return;
        }
        if message.text.trim().is_empty() && message.image_attachments().next().is_none() {
            return;
        }

        *self
            .last_interaction
            .lock()
            .expect("last_interaction lock poisoned") = Instant::now();

        let parent_id = message.parent_id.clone();
        let input = {
            let mut state = self.state.lock().await;
            remember(&mut state.history, message);
            self.build_turn_input(&state)
        };

        let placeholder = match self.chat.create_ai_message(parent_id.as_deref()).await {
            Ok(m) => m,
            Err(e) => {
                warn!(cid = %self.chat.cid(), error = %e, "failed to create AI message");
                return;
            }
        };

        let thinking = IndicatorEvent::update(self.chat.cid(), &placeholder.id, AiState::Thinking);
        if let Err(e) = self.chat.send_event(&thinking).await {
            debug!(message_id = %placeholder.id, error = %e, "failed to signal thinking");
        }

        let handler = Arc::new(ResponseHandler::new(
            HandlerContext {
                chat: Arc::clone(&self.chat),
                model: Arc::clone(&self.model),
                tools: self.tools.clone(),
                message_id: placeholder.id.clone(),
                input,
            },
            self.outcome_tx.clone(),
        ));

        {
            let mut state = self.state.lock().await;
            match state.handlers.entry(placeholder.id.clone()) {
                std::collections::hash_map::Entry::Occupied(_) => {
                    warn!(message_id = %placeholder.id, "turn already in flight for this message");
                    return;
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&handler));
                }
            }
        }

        handler.start().await;
    }

    async fn handle_stop(&self, message_id: Option<String>) {
        let Some(message_id) = message_id else {
            debug!("stop request without a message id");
            return;
        };
        let handler = self.state.lock().await.handlers.get(&message_id).cloned();
        match handler {
            Some(handler) => {
                info!(message_id = %message_id, "stopping generation on user request");
                handler.stop().await;
            }
            None => debug!(message_id = %message_id, "stop request for an unknown turn"),
        }
    }

    async fn handle_outcome(&self, outcome: TurnOutcome) {
        let mut state = self.state.lock().await;
        state.handlers.remove(&outcome.message_id);
        if outcome.response_id.is_some() {
            state.last_response_id = outcome.response_id;
        }
        if !outcome.text.is_empty() {
            remember(
                &mut state.history,
                ChatMessage {
                    id: outcome.message_id,
                    text: outcome.text,
                    ai_generated: true,
                    user: Some(UserRef::new(&self.bot_user_id)),
                    ..Default::default()
                },
            );
        }
    }

    /// Prompt assembly: system instructions, then the trailing slice of
    /// history. Only the newest entry contributes image parts.
    fn build_turn_input(&self, state: &AgentState) -> TurnInput {
        let mut messages = vec![PromptMessage::text(Role::System, SYSTEM_PROMPT)];

        let window_start = state.history.len().saturating_sub(CONTEXT_WINDOW);
        let last_index = state.history.len().saturating_sub(1);

        for (index, entry) in state.history.iter().enumerate().skip(window_start) {
            let role = if entry.is_from_bot() {
                Role::Assistant
            } else {
                Role::User
            };

            let mut content = Vec::new();
            if index == last_index {
                for attachment in entry.image_attachments() {
                    if let Some(url) = attachment.image_source() {
                        content.push(ContentPart::image(url));
                    }
                }
            }
            let text = entry.text.trim();
            if !text.is_empty() {
                content.push(ContentPart::text(text));
            } else if !content.is_empty() {
                content.push(ContentPart::text(IMAGE_ONLY_FALLBACK));
            }
            if content.is_empty() {
                continue;
            }

            messages.push(PromptMessage { role, content });
        }

        TurnInput {
            messages,
            tools: self.tools.iter().map(|t| t.definition()).collect(),
            previous_response_id: state.last_response_id.clone(),
        }
    }
}

#[cfg(test)]
impl ChannelAgent {
    pub(crate) async fn state_snapshot(&self) -> (usize, usize, Option<String>) {
        let state = self.inner.state.lock().await;
        (
            state.history.len(),
            state.handlers.len(),
            state.last_response_id.clone(),
        )
    }
}

/// Append with FIFO eviction at [`HISTORY_CAPACITY`].
fn remember(history: &mut VecDeque<ChatMessage>, message: ChatMessage) {
    if history.len() == HISTORY_CAPACITY {
        history.pop_front();
    }
    history.push_back(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockChat, NoopListener, ScriptedModel};
    use chatrelay_core::error::ProviderError;
    use chatrelay_core::message::MessageAttachment;
    use chatrelay_core::provider::ResponseEvent;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    type Script = Vec<std::result::Result<ResponseEvent, ProviderError>>;

    fn completed_script(reply: &str, response_id: &str) -> Script {
        vec![
            Ok(ResponseEvent::Created {
                response_id: response_id.into(),
            }),
            Ok(ResponseEvent::TextDelta {
                delta: reply.into(),
            }),
            Ok(ResponseEvent::Completed),
        ]
    }

    fn user_message(id: &str, text: &str) -> ChatEvent {
        ChatEvent::MessageNew {
            cid: Some("messaging:general".into()),
            message: Some(ChatMessage {
                id: id.into(),
                text: text.into(),
                user: Some(UserRef::new("alice")),
                ..Default::default()
            }),
        }
    }

    struct Harness {
        agent: ChannelAgent,
        chat: Arc<MockChat>,
        model: Arc<ScriptedModel>,
        listener: Arc<NoopListener>,
        events: mpsc::Sender<ChatEvent>,
    }

    fn harness(model: ScriptedModel) -> Harness {
        let chat = Arc::new(MockChat::new("messaging:general"));
        let model = Arc::new(model);
        let listener = Arc::new(NoopListener::default());
        let (events, events_rx) = mpsc::channel(32);
        let agent = ChannelAgent::new(AgentParams {
            bot_user_id: "ai-bot-general".into(),
            chat: chat.clone(),
            model: model.clone(),
            tools: vec![],
            listener: listener.clone(),
            events: events_rx,
        });
        Harness {
            agent,
            chat,
            model,
            listener,
            events,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    /// Wait until the turn's outcome has been absorbed into agent state.
    async fn wait_for_settled(agent: &ChannelAgent, history_len: usize) {
        for _ in 0..200 {
            let (len, live, _) = agent.state_snapshot().await;
            if len == history_len && live == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("agent state never settled");
    }

    #[tokio::test]
    async fn init_fails_without_credentials() {
        let h = harness(ScriptedModel::new(vec![]).unconfigured());
        let err = h.agent.init().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        // The listener never started.
        assert_eq!(h.listener.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn user_message_produces_a_full_turn() {
        let h = harness(ScriptedModel::new(vec![completed_script("Hi there!", "resp_1")]));
        h.agent.init().await.unwrap();
        assert_eq!(h.listener.starts.load(Ordering::SeqCst), 1);

        h.events.send(user_message("m1", "hello")).await.unwrap();

        let chat = h.chat.clone();
        wait_until(move || {
            chat.updates
                .lock()
                .unwrap()
                .last()
                .is_some_and(|u| !u.generating)
        })
        .await;

        assert_eq!(h.chat.created.lock().unwrap().len(), 1);
        assert_eq!(h.chat.updates.lock().unwrap().last().unwrap().text, "Hi there!");

        // THINKING was signalled before any streaming state.
        let events = h.chat.events.lock().unwrap().clone();
        assert!(matches!(
            events.first(),
            Some(IndicatorEvent::Update {
                ai_state: AiState::Thinking,
                ..
            })
        ));

        // Prompt carried the system instructions plus the user message.
        let starts = h.model.starts.lock().unwrap();
        let input = &starts[0];
        assert_eq!(input.messages.len(), 2);
        assert_eq!(input.messages[0].role, Role::System);
        assert_eq!(input.messages[1].plain_text(), "hello");

        h.agent.dispose().await;
        assert_eq!(h.listener.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bot_and_empty_messages_are_ignored() {
        let h = harness(ScriptedModel::new(vec![]));
        h.agent.init().await.unwrap();

        h.events
            .send(ChatEvent::MessageNew {
                cid: None,
                message: Some(ChatMessage {
                    id: "b1".into(),
                    text: "echo of myself".into(),
                    ai_generated: true,
                    ..Default::default()
                }),
            })
            .await
            .unwrap();
        h.events.send(user_message("m1", "   ")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.chat.created.lock().unwrap().is_empty());
        assert!(h.model.starts.lock().unwrap().is_empty());

        h.agent.dispose().await;
    }

    #[tokio::test]
    async fn turns_chain_through_the_response_anchor() {
        let h = harness(ScriptedModel::new(vec![
            completed_script("First answer.", "resp_1"),
            completed_script("Second answer.", "resp_2"),
        ]));
        h.agent.init().await.unwrap();

        h.events.send(user_message("m1", "first question")).await.unwrap();
        // User question plus the bot's reply.
        wait_for_settled(&h.agent, 2).await;

        h.events.send(user_message("m2", "second question")).await.unwrap();
        let model = h.model.clone();
        wait_until(move || model.starts.lock().unwrap().len() == 2).await;

        let starts = h.model.starts.lock().unwrap();
        assert_eq!(starts[0].previous_response_id, None);
        assert_eq!(starts[1].previous_response_id.as_deref(), Some("resp_1"));

        // The second prompt sees both the first question and the bot's answer.
        let texts: Vec<String> = starts[1].messages.iter().map(|m| m.plain_text()).collect();
        assert!(texts.contains(&"first question".to_string()));
        assert!(texts.contains(&"First answer.".to_string()));

        h.agent.dispose().await;
    }

    #[tokio::test]
    async fn prompt_window_is_bounded() {
        let scripts: Vec<Script> = (0..8)
            .map(|i| completed_script("ok", &format!("resp_{i}")))
            .collect();
        let h = harness(ScriptedModel::new(scripts));
        h.agent.init().await.unwrap();

        for i in 0..8 {
            h.events
                .send(user_message(&format!("m{i}"), &format!("question {i}")))
                .await
                .unwrap();
            // Each turn leaves a user entry and a bot entry behind.
            wait_for_settled(&h.agent, (i + 1) * 2).await;
        }

        let starts = h.model.starts.lock().unwrap();
        let last = starts.last().unwrap();
        // System prompt plus at most five history entries.
        assert_eq!(last.messages.len(), 1 + 5);
        assert_eq!(last.messages.last().unwrap().plain_text(), "question 7");

        h.agent.dispose().await;
    }

    #[tokio::test]
    async fn image_only_message_gets_fallback_text() {
        let h = harness(ScriptedModel::new(vec![completed_script("A nice photo.", "resp_1")]));
        h.agent.init().await.unwrap();

        h.events
            .send(ChatEvent::MessageNew {
                cid: None,
                message: Some(ChatMessage {
                    id: "m1".into(),
                    text: String::new(),
                    user: Some(UserRef::new("alice")),
                    attachments: vec![MessageAttachment {
                        kind: Some("image".into()),
                        image_url: Some("https://cdn/photo.jpg".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            })
            .await
            .unwrap();

        let model = h.model.clone();
        wait_until(move || model.starts.lock().unwrap().len() == 1).await;

        let starts = h.model.starts.lock().unwrap();
        let last = starts[0].messages.last().unwrap();
        assert!(last
            .content
            .iter()
            .any(|p| matches!(p, ContentPart::Image { image_url, .. } if image_url == "https://cdn/photo.jpg")));
        assert_eq!(last.plain_text(), IMAGE_ONLY_FALLBACK);

        h.agent.dispose().await;
    }

    #[tokio::test]
    async fn duplicate_placeholder_id_is_rejected() {
        let h = harness(ScriptedModel::new(vec![vec![Ok(ResponseEvent::Created {
            response_id: "resp_1".into(),
        })]])
        .hold_stream_open());
        h.chat.pin_message_id("ai-msg-fixed");
        h.agent.init().await.unwrap();

        h.events.send(user_message("m1", "first")).await.unwrap();
        let model = h.model.clone();
        wait_until(move || model.starts.lock().unwrap().len() == 1).await;

        h.events.send(user_message("m2", "second")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Second placeholder collides; no second turn starts.
        assert_eq!(h.chat.created.lock().unwrap().len(), 2);
        assert_eq!(h.model.starts.lock().unwrap().len(), 1);

        h.agent.dispose().await;
    }

    #[tokio::test]
    async fn stop_event_cancels_the_turn() {
        let h = harness(
            ScriptedModel::new(vec![vec![
                Ok(ResponseEvent::Created {
                    response_id: "resp_1".into(),
                }),
                Ok(ResponseEvent::TextDelta {
                    delta: "partial".into(),
                }),
            ]])
            .hold_stream_open(),
        );
        h.agent.init().await.unwrap();

        h.events.send(user_message("m1", "long story please")).await.unwrap();
        let chat = h.chat.clone();
        wait_until(move || !chat.updates.lock().unwrap().is_empty()).await;

        let message_id = h.chat.created.lock().unwrap()[0].id.clone();
        h.events
            .send(ChatEvent::IndicatorStop {
                cid: None,
                message_id: Some(message_id),
            })
            .await
            .unwrap();

        let chat = h.chat.clone();
        wait_until(move || {
            chat.updates
                .lock()
                .unwrap()
                .last()
                .is_some_and(|u| !u.generating)
        })
        .await;
        assert_eq!(h.chat.updates.lock().unwrap().last().unwrap().text, "partial");

        h.agent.dispose().await;
    }

    #[tokio::test]
    async fn interaction_timestamp_tracks_user_messages() {
        let h = harness(ScriptedModel::new(vec![completed_script("ok", "resp_1")]));
        h.agent.init().await.unwrap();
        let before = h.agent.last_interaction();

        tokio::time::sleep(Duration::from_millis(20)).await;
        h.events.send(user_message("m1", "hello")).await.unwrap();
        let model = h.model.clone();
        wait_until(move || model.starts.lock().unwrap().len() == 1).await;

        assert!(h.agent.last_interaction() > before);
        h.agent.dispose().await;
    }

    #[test]
    fn history_evicts_oldest_past_capacity() {
        let mut history = VecDeque::new();
        for i in 0..30 {
            remember(
                &mut history,
                ChatMessage {
                    id: format!("m{i}"),
                    text: format!("message {i}"),
                    ..Default::default()
                },
            );
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.front().unwrap().id, "m5");
        assert_eq!(history.back().unwrap().id, "m29");
    }
}
