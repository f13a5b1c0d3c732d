//! Runs one task in a visible browser and saves a screenshot after every action.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use browser_pilot::executor::normalize_url;
use browser_pilot::types::{ADHOC_MAX_TURNS, DEFAULT_START_URL};
use browser_pilot::{
    AgentConfig, AgentEvent, AgentLoop, BrowserSession, ChromeSession, GeminiClient, RetryPolicy,
    RetryingClient,
};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agent", about = "Drive a local Chrome with the computer-use model")]
struct Cli {
    /// What the agent should do
    #[arg(default_value = "Search for the weather in San Francisco")]
    task: Vec<String>,

    #[arg(long, default_value = DEFAULT_START_URL)]
    start_url: String,

    #[arg(long, default_value_t = ADHOC_MAX_TURNS)]
    max_turns: usize,

    /// Hide the browser window
    #[arg(long)]
    headless: bool,

    /// Where screenshots are written
    #[arg(long, default_value = ".")]
    screenshots_dir: PathBuf,

    /// Leave the browser open until Enter is pressed
    #[arg(long)]
    keep_open: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let task = cli.task.join(" ");
    let mut config = AgentConfig::from_env().context("loading configuration")?;
    config.headless = cli.headless;

    tokio::fs::create_dir_all(&cli.screenshots_dir)
        .await
        .with_context(|| format!("creating {}", cli.screenshots_dir.display()))?;

    info!(%task, start_url = %cli.start_url, "starting agent");
    let options = config.browser_options();
    let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&options))
        .await
        .map_err(|e| anyhow!("Browser launch panicked: {e}"))??;

    session.navigate(&normalize_url(&cli.start_url)).await?;
    session.wait_for_load().await?;
    let initial = session.screenshot().await?;
    save(&cli.screenshots_dir, "screenshot_0_initial.png", initial.bytes()).await;

    let client = RetryingClient::new(
        GeminiClient::new(config.api_key.clone(), config.model.clone())?
            .with_endpoint(config.endpoint.clone()),
        RetryPolicy::default(),
    );

    let (events, rx) = broadcast::channel(64);
    let saver = tokio::spawn(save_screenshots(rx, cli.screenshots_dir.clone()));

    let result = AgentLoop::new(&client, &session, config.loop_options(cli.max_turns, None))
        .with_events(events)
        .run(&task)
        .await?;
    // the loop dropped its sender, so the saver drains and exits
    let _ = saver.await;

    println!("{}", "=".repeat(60));
    println!("Status: {:?}", result.status);
    println!("Final URL: {}", result.final_url);
    println!("Actions taken: {}", result.actions_taken.len());
    for (i, record) in result.actions_taken.iter().enumerate() {
        match &record.error {
            Some(err) => println!("  {}. {} (failed: {err})", i + 1, record.name),
            None => println!("  {}. {}", i + 1, record.name),
        }
    }
    if !result.final_response.is_empty() {
        println!("Response: {}", result.final_response);
    }

    if cli.keep_open {
        println!("Press Enter to close the browser...");
        let mut line = String::new();
        tokio::task::spawn_blocking(move || std::io::stdin().read_line(&mut line)).await??;
    }
    Ok(())
}

async fn save_screenshots(mut rx: broadcast::Receiver<AgentEvent>, dir: PathBuf) {
    loop {
        match rx.recv().await {
            Ok(AgentEvent::ActionExecuted {
                turn,
                action,
                screenshot: Some(shot),
                ..
            }) => {
                let name = format!("screenshot_{turn}_{}.png", file_safe(&action));
                save(&dir, &name, shot.bytes()).await;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "screenshot saver fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Action names come from the model; keep them inside the screenshot directory.
fn file_safe(action: &str) -> String {
    action
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

async fn save(dir: &Path, name: &str, bytes: &[u8]) {
    let path = dir.join(name);
    match tokio::fs::write(&path, bytes).await {
        Ok(()) => info!("saved {}", path.display()),
        Err(err) => warn!("could not save {}: {err}", path.display()),
    }
}
