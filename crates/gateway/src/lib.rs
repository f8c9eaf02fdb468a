//! HTTP control plane for chatrelay.
//!
//! Three routes: a status page, `POST /start-ai-agent` to put a bot into a
//! channel, and `POST /stop-ai-agent` to take it out. Agent lifetime is owned
//! by the [`AgentRegistry`]; this layer only translates HTTP into registry
//! operations and wires up the per-channel plumbing.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use chatrelay_agent::{AgentParams, AgentRegistry, ChannelAgent};
use chatrelay_chat::{ListenerConfig, RealtimeListener, StreamChatClient, create_user_token};
use chatrelay_config::AppConfig;
use chatrelay_core::agent::{AgentPlatform, AiAgent, bot_user_id, normalize_channel_id};
use chatrelay_core::provider::ChatModel;
use chatrelay_core::{ChatApi, EventListener, Tool};
use chatrelay_providers::{AnthropicMessagesClient, OpenAiResponsesClient};
use chatrelay_tools::CurrentTemperatureTool;

/// How many decoded realtime events may queue per agent.
const EVENT_QUEUE_DEPTH: usize = 256;

const BOT_DISPLAY_NAME: &str = "AI Bot";

/// Shared state behind every route.
pub struct AppState {
    pub config: AppConfig,
    pub chat: Arc<StreamChatClient>,
    pub registry: Arc<AgentRegistry>,

    /// Validated at startup so handlers never re-check presence.
    api_secret: String,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("api_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

type SharedState = Arc<AppState>;

/// Build the shared state, failing fast on missing chat credentials.
pub fn build_state(
    config: AppConfig,
    registry: Arc<AgentRegistry>,
) -> Result<SharedState, chatrelay_core::error::Error> {
    let api_key = config
        .stream
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| chatrelay_core::error::Error::Config {
            message: "stream.api_key is not set".into(),
        })?;
    let api_secret = config
        .stream
        .api_secret
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| chatrelay_core::error::Error::Config {
            message: "stream.api_secret is not set".into(),
        })?;

    let chat = Arc::new(StreamChatClient::new(
        api_key,
        &api_secret,
        config.stream.base_url.clone(),
    )?);

    Ok(Arc::new(AppState {
        config,
        chat,
        registry,
        api_secret,
    }))
}

/// Build the Axum router. CORS is wide open: the control plane is expected
/// to sit behind the deployment's own perimeter.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/start-ai-agent", post(start_agent_handler))
        .route("/stop-ai-agent", post(stop_agent_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: SharedState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!(
        "{}:{}",
        state.config.gateway.host, state.config.gateway.port
    );
    let app = build_router(state);

    info!(addr = %addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct StatusResponse {
    message: &'static str,
    api_key: String,
    active_agents: usize,
}

async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "ChatRelay AI server is running",
        api_key: state.chat.api_key().to_string(),
        active_agents: state.registry.count().await,
    })
}

#[derive(Debug, Deserialize)]
struct StartAgentRequest {
    channel_id: String,

    #[serde(default = "default_channel_type")]
    channel_type: String,

    #[serde(default)]
    platform: AgentPlatform,
}

#[derive(Debug, Deserialize)]
struct StopAgentRequest {
    channel_id: String,

    #[serde(default = "default_channel_type")]
    channel_type: String,
}

fn default_channel_type() -> String {
    "messaging".into()
}

#[derive(Serialize)]
struct ApiResponse {
    message: String,
}

impl ApiResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

type ApiError = (StatusCode, Json<ApiResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, ApiResponse::new(message))
}

fn internal_error(message: impl Into<String>) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::new(message))
}

async fn start_agent_handler(
    State(state): State<SharedState>,
    Json(payload): Json<StartAgentRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let channel_id = normalize_channel_id(&payload.channel_id);
    if channel_id.is_empty() {
        return Err(bad_request("channel_id is required"));
    }

    if state.registry.contains(&channel_id).await {
        return Ok(ApiResponse::new("AI agent already started"));
    }

    let bot_id = bot_user_id(&channel_id);
    info!(
        channel_id = %channel_id,
        bot = %bot_id,
        platform = %payload.platform.as_str(),
        "starting AI agent"
    );

    state
        .chat
        .upsert_user(&bot_id, BOT_DISPLAY_NAME)
        .await
        .map_err(|e| {
            error!(bot = %bot_id, error = %e, "failed to upsert bot user");
            internal_error("failed to create bot user")
        })?;

    // Membership is best effort: some channel types auto-include the bot.
    if let Err(e) = state
        .chat
        .add_members(&payload.channel_type, &channel_id, &[&bot_id])
        .await
    {
        warn!(channel_id = %channel_id, error = %e, "failed to add bot to channel");
    }

    let model = build_model(&state.config, payload.platform);
    let channel: Arc<dyn ChatApi> = Arc::new(state.chat.channel(
        &payload.channel_type,
        &channel_id,
        &bot_id,
    ));
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(CurrentTemperatureTool::new(
        state.config.tools.openweather_api_key.clone(),
    ))];

    let auth_token = create_user_token(&state.api_secret, &bot_id).map_err(|e| {
        error!(bot = %bot_id, error = %e, "failed to mint user token");
        internal_error("failed to mint bot credentials")
    })?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let listener: Arc<dyn EventListener> = Arc::new(RealtimeListener::new(
        ListenerConfig {
            ws_url: state.config.stream.ws_url.clone(),
            api_key: state.chat.api_key().to_string(),
            user_id: bot_id.clone(),
            auth_token,
            heartbeat: Duration::from_secs(state.config.stream.heartbeat_secs),
            connect_timeout: Duration::from_secs(state.config.stream.connect_timeout_secs),
        },
        events_tx,
    ));

    let agent = Arc::new(ChannelAgent::new(AgentParams {
        bot_user_id: bot_id,
        chat: channel,
        model,
        tools,
        listener,
        events: events_rx,
    }));

    if let Err(e) = agent.init().await {
        error!(channel_id = %channel_id, error = %e, "agent failed to start");
        return Err(internal_error(format!("failed to start agent: {e}")));
    }

    state.registry.insert(channel_id, agent).await;
    Ok(ApiResponse::new("AI agent started"))
}

async fn stop_agent_handler(
    State(state): State<SharedState>,
    Json(payload): Json<StopAgentRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let channel_id = normalize_channel_id(&payload.channel_id);
    if channel_id.is_empty() {
        return Err(bad_request("channel_id is required"));
    }

    if !state.registry.remove(&channel_id).await {
        return Err((StatusCode::NOT_FOUND, ApiResponse::new("AI agent not found")));
    }

    let bot_id = bot_user_id(&channel_id);
    if let Err(e) = state
        .chat
        .remove_members(&payload.channel_type, &channel_id, &[&bot_id])
        .await
    {
        warn!(channel_id = %channel_id, error = %e, "failed to remove bot from channel");
    }

    info!(channel_id = %channel_id, "AI agent stopped");
    Ok(ApiResponse::new("AI agent stopped"))
}

fn build_model(config: &AppConfig, platform: AgentPlatform) -> Arc<dyn ChatModel> {
    match platform {
        AgentPlatform::OpenAi => Arc::new(OpenAiResponsesClient::new(
            config.providers.openai_api_key.clone().unwrap_or_default(),
        )),
        AgentPlatform::Anthropic => Arc::new(AnthropicMessagesClient::new(
            config.providers.anthropic_api_key.clone().unwrap_or_default(),
        )),
    }
}
