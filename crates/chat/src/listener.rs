//! Realtime websocket listener.
//!
//! One persistent connection per bot identity. The connection task decodes
//! frames into [`ChatEvent`]s and forwards them to the owning agent over a
//! bounded channel; connection-maintenance frames never leave this module.
//! Reconnects use exponential backoff that resets after a successful
//! connect, and `stop` is prompt: the cancellation token is checked at every
//! suspension point.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatrelay_core::error::ChatError;
use chatrelay_core::event::ChatEvent;
use chatrelay_core::EventListener;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters for one bot identity.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub ws_url: String,
    pub api_key: String,
    pub user_id: String,

    /// User JWT presented as the `authorization` query param.
    pub auth_token: String,

    /// Interval between client pings.
    pub heartbeat: Duration,

    /// Budget for establishing one connection attempt.
    pub connect_timeout: Duration,
}

/// Exponential reconnect backoff: 1s doubling to a 30s cap.
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    const MIN: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self { delay: Self::MIN }
    }

    /// The delay to sleep before the next attempt. Doubles per call.
    pub fn next(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (delay * 2).min(Self::MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.delay = Self::MIN;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// The realtime listener for one bot identity.
pub struct RealtimeListener {
    config: ListenerConfig,
    events: mpsc::Sender<ChatEvent>,
    task: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl RealtimeListener {
    pub fn new(config: ListenerConfig, events: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            config,
            events,
            task: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl EventListener for RealtimeListener {
    async fn start(&self) -> Result<(), ChatError> {
        let mut guard = self.task.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            self.config.clone(),
            self.events.clone(),
            cancel.clone(),
        ));
        *guard = Some((cancel, handle));
        Ok(())
    }

    async fn stop(&self) {
        let Some((cancel, handle)) = self.task.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "listener task ended abnormally");
        }
    }
}

enum PumpEnd {
    /// Stop was requested.
    Stopped,
    /// The owning agent dropped its receiver.
    OwnerGone,
    /// The connection died; reconnect.
    Disconnected(String),
}

async fn run(config: ListenerConfig, events: mpsc::Sender<ChatEvent>, cancel: CancellationToken) {
    let mut backoff = Backoff::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match connect(&config).await {
            Ok(ws) => {
                info!(user_id = %config.user_id, "realtime connection established");
                backoff.reset();
                match pump(ws, &config, &events, &cancel).await {
                    PumpEnd::Stopped | PumpEnd::OwnerGone => break,
                    PumpEnd::Disconnected(reason) => {
                        warn!(user_id = %config.user_id, reason = %reason, "realtime connection dropped");
                    }
                }
            }
            Err(e) => {
                warn!(user_id = %config.user_id, error = %e, "realtime connect failed");
            }
        }

        let delay = backoff.next();
        debug!(delay_secs = delay.as_secs(), "reconnecting after backoff");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!(user_id = %config.user_id, "realtime listener exited");
}

async fn connect(config: &ListenerConfig) -> Result<WsStream, ChatError> {
    let mut url = reqwest::Url::parse(&config.ws_url)
        .map_err(|e| ChatError::ConnectionLost(format!("invalid websocket url: {e}")))?;
    url.query_pairs_mut()
        .append_pair("json", "1")
        .append_pair("api_key", &config.api_key)
        .append_pair("user_id", &config.user_id)
        .append_pair("authorization", &config.auth_token);

    let (ws, _) = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ChatError::ConnectionLost("connect timed out".into()))?
        .map_err(|e| ChatError::ConnectionLost(e.to_string()))?;
    Ok(ws)
}

async fn pump(
    ws: WsStream,
    config: &ListenerConfig,
    events: &mpsc::Sender<ChatEvent>,
    cancel: &CancellationToken,
) -> PumpEnd {
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return PumpEnd::Stopped;
            }
            _ = heartbeat.tick() => {
                if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    return PumpEnd::Disconnected("heartbeat ping failed".into());
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ChatEvent>(&text) {
                        Ok(event) if event.is_control() => {}
                        Ok(event) => {
                            if events.send(event).await.is_err() {
                                return PumpEnd::OwnerGone;
                            }
                        }
                        Err(e) => warn!(error = %e, "undecodable realtime frame"),
                    }
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = sink.send(WsMessage::Pong(payload)).await;
                }
                Some(Ok(WsMessage::Close(_))) => {
                    return PumpEnd::Disconnected("server closed connection".into());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpEnd::Disconnected(e.to_string()),
                None => return PumpEnd::Disconnected("stream ended".into()),
            }
        }
    }
}
