//! `chatrelay serve` — Start the agent server and HTTP control plane.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use chatrelay_agent::AgentRegistry;
use chatrelay_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("chatrelay server");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Idle agents swept after: {} min",
        config.agents.inactivity_threshold_mins
    );

    let registry = Arc::new(AgentRegistry::new(Duration::from_secs(
        config.agents.inactivity_threshold_mins * 60,
    )));
    registry
        .start_sweep(Duration::from_secs(config.agents.sweep_interval_secs))
        .await;

    let state = chatrelay_gateway::build_state(config, Arc::clone(&registry))?;
    chatrelay_gateway::serve(state, shutdown_signal()).await?;

    info!("shutting down, disposing agents");
    registry.dispose_all().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
