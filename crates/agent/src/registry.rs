//! Registry of live agents, keyed by channel id, with an inactivity sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chatrelay_core::agent::AiAgent;

pub struct AgentRegistry {
    agents: tokio::sync::Mutex<HashMap<String, Arc<dyn AiAgent>>>,
    inactivity_threshold: Duration,
    sweep: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl AgentRegistry {
    pub fn new(inactivity_threshold: Duration) -> Self {
        Self {
            agents: tokio::sync::Mutex::new(HashMap::new()),
            inactivity_threshold,
            sweep: tokio::sync::Mutex::new(None),
        }
    }

    /// Register an agent for a channel. A previous agent under the same id
    /// is disposed.
    pub async fn insert(&self, channel_id: impl Into<String>, agent: Arc<dyn AiAgent>) {
        let channel_id = channel_id.into();
        let replaced = self.agents.lock().await.insert(channel_id.clone(), agent);
        if let Some(old) = replaced {
            info!(channel_id = %channel_id, "replacing existing agent");
            old.dispose().await;
        }
    }

    /// Remove and dispose the agent for a channel. Returns whether one
    /// existed.
    pub async fn remove(&self, channel_id: &str) -> bool {
        let removed = self.agents.lock().await.remove(channel_id);
        match removed {
            Some(agent) => {
                agent.dispose().await;
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, channel_id: &str) -> bool {
        self.agents.lock().await.contains_key(channel_id)
    }

    pub async fn count(&self) -> usize {
        self.agents.lock().await.len()
    }

    /// Start the periodic idle sweep. Idempotent.
    pub async fn start_sweep(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.sweep.lock().await;
        if guard.is_some() {
            return;
        }
        let registry = Arc::clone(self);
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => return,
                    _ = ticker.tick() => registry.sweep_once().await,
                }
            }
        });
        *guard = Some((cancel, handle));
    }

    pub async fn stop_sweep(&self) {
        if let Some((cancel, handle)) = self.sweep.lock().await.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "sweep task ended abnormally");
            }
        }
    }

    /// Dispose every agent whose last interaction is older than the
    /// threshold.
    pub async fn sweep_once(&self) {
        let now = Instant::now();
        let stale: Vec<(String, Arc<dyn AiAgent>)> = {
            let mut agents = self.agents.lock().await;
            let ids: Vec<String> = agents
                .iter()
                .filter(|(_, agent)| {
                    now.saturating_duration_since(agent.last_interaction())
                        > self.inactivity_threshold
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| agents.remove(&id).map(|agent| (id, agent)))
                .collect()
        };

        for (channel_id, agent) in stale {
            info!(channel_id = %channel_id, "disposing idle agent");
            agent.dispose().await;
        }
    }

    /// Dispose everything, for shutdown.
    pub async fn dispose_all(&self) {
        self.stop_sweep().await;
        let agents: Vec<Arc<dyn AiAgent>> =
            self.agents.lock().await.drain().map(|(_, a)| a).collect();
        for agent in agents {
            agent.dispose().await;
        }
    }
}
