//! `chatrelay config` — Show the effective configuration.

use chatrelay_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // The Debug impls redact every credential.
    println!("{config:#?}");

    if config.stream.api_key.is_none() || config.stream.api_secret.is_none() {
        println!();
        println!("Warning: chat credentials are not set (STREAM_API_KEY / STREAM_API_SECRET)");
    }
    if config.providers.openai_api_key.is_none() && config.providers.anthropic_api_key.is_none() {
        println!("Warning: no model backend key set (OPENAI_API_KEY / ANTHROPIC_API_KEY)");
    }

    Ok(())
}
