use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

mod config;
mod db;
mod error;
mod history;
mod llm;
mod pipeline;
#[cfg(test)]
mod testing;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::registry::ConnectionRegistry;
use crate::db::schema_manager::SchemaManager;
use crate::history::store::HistoryStore;
use crate::history::QueryHistory;
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Ensure data directory exists
    let data_dir = PathBuf::from(&config.data_dir);
    if !data_dir.exists() {
        info!("Creating data directory: {}", config.data_dir);
        std::fs::create_dir_all(&data_dir)?;
    }

    info!("Registering {} configured connections", config.connections.len());
    let registry = Arc::new(ConnectionRegistry::new(config.sandbox.pool_size));
    for connection in &config.connections {
        if let Err(e) = registry.register(&connection.id, &connection.path).await {
            error!("Failed to register connection '{}': {}", connection.id, e);
        }
    }

    // Snapshots for every connection that registered
    let schema_manager = Arc::new(SchemaManager::new(Arc::clone(&registry)));
    schema_manager.refresh_all().await;

    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = LlmManager::new(&config.llm)?;

    let history = match config.history.path.as_deref() {
        Some(path) => {
            let path = data_dir.join(path);
            info!("Loading query history from {}", path.display());
            let store = HistoryStore::open(&path.to_string_lossy())?;
            QueryHistory::open(store).await?
        }
        None => {
            warn!("No history path configured; query history will not survive a restart");
            QueryHistory::in_memory()
        }
    };

    let app_state = Arc::new(AppState::new(
        config.clone(),
        registry,
        schema_manager,
        llm_manager,
        Arc::new(history),
    ));

    info!("Starting AskDash server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(()) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
