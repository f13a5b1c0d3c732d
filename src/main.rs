use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use browser_pilot::face::{self, AppState};
use browser_pilot::{AgentConfig, ChromeLauncher, GeminiClient, RetryPolicy, RetryingClient};
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::from_env().context("loading configuration")?;

    let gemini = GeminiClient::new(config.api_key.clone(), config.model.clone())?
        .with_endpoint(config.endpoint.clone());
    let client = Arc::new(RetryingClient::new(gemini, RetryPolicy::default()));
    let sessions = Arc::new(ChromeLauncher {
        options: config.browser_options(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(model = %config.model, %addr, "starting browser agent service");

    let state = Arc::new(AppState::new(config, client, sessions));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, face::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}
