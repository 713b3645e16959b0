//! research-chat server
//!
//! Run: GROQ_API_KEY=... cargo run --bin research-chat
//! Settings come from `CHAT_*` environment variables; see `AppConfig::from_env`.

use std::sync::Arc;

use anyhow::Context;
use research_chat::{
    build_router, telemetry, AppConfig, AppState, FixedWindowLimiter, OpenAIStreamProvider,
    ResponseLoop,
};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let provider = OpenAIStreamProvider::from_config(&config).context("configuring model provider")?;
    let chat = ResponseLoop::from_config(Arc::new(provider), &config)?;

    let limiter = Arc::new(FixedWindowLimiter::new(config.rate_limit));
    let sweeper = limiter.spawn_sweeper(config.rate_limit.sweep_interval);

    let app = build_router(AppState::new(limiter, chat));
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    info!(
        addr = %config.bind_addr,
        model = %config.model,
        limit = config.rate_limit.limit,
        max_steps = config.max_steps,
        "research-chat listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
