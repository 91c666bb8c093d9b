//! Doubt Solver Daemon - web API for the exam doubt solver
//!
//! Accepts questions (text and/or image), answers them through the chat
//! completion endpoint and keeps accounts, threads and feedback in SQLite.

use anyhow::{Context, Result};
use doubt_common::llm_client::HttpChatClient;
use doubt_common::store::Store;
use doubt_common::{image_host, Config, Solver};
use doubtd::server::{self, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Doubt Solver Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    if config.llm.api_key.is_none() {
        warn!("No API key configured; questions will fail until OPENAI_API_KEY is set");
    }

    // Blocking HTTP clients must be built outside the async runtime.
    let store = Store::open(&config.storage.db_path).context("Failed to open database")?;
    let chat = HttpChatClient::new(config.llm.clone())?;
    let images = image_host::from_config(&config.image_host)?;
    info!(
        "  Model {} via {}, images {:?}, normalizer {}",
        config.llm.model, config.llm.endpoint, config.image_host.mode, config.solver.strategy
    );

    let solver = Solver::new(
        Arc::new(chat),
        Arc::from(images),
        Arc::new(store),
        config.solver.clone(),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(server::run(AppState::new(solver), &config.server.bind))?;

    info!("Doubt Solver Daemon stopped");
    Ok(())
}
