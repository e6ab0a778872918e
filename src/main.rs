//! Quizbot - group management chat bot
//!
//! Each user moves through a small conversation state machine to create a
//! group, join one by code, or ask which group they belong to.

mod commands;
mod config;
mod directory;
mod runtime;
mod session;
mod state_machine;
mod transport;

use commands::CommandRegistry;
use config::BotConfig;
use directory::Database;
use runtime::{DatabaseDirectory, DispatchManager, EventProcessor, ProductionDispatcher};
use session::SessionStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::TelegramTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizbot=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = BotConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    let commands = Arc::new(CommandRegistry::builtin()?);
    let transport = Arc::new(TelegramTransport::new(&config.telegram_token));

    if let Err(e) = transport.publish_commands(&commands).await {
        tracing::warn!(error = %e, "Failed to publish command menu");
    }

    let processor = EventProcessor::new(
        Arc::new(DatabaseDirectory::new(db)),
        Arc::clone(&transport),
        commands,
        Arc::new(SessionStore::new()),
    );
    let dispatcher: Arc<ProductionDispatcher> = Arc::new(DispatchManager::new(processor));

    let cancel = CancellationToken::new();
    let sweeper =
        dispatcher.start_session_sweeper(config.session_ttl, config.sweep_interval, cancel.clone());

    tracing::info!(
        session_ttl_secs = ?config.session_ttl.map(|ttl| ttl.num_seconds()),
        "Quizbot started"
    );
    Arc::clone(&dispatcher).run(transport.receive_events()).await;

    cancel.cancel();
    sweeper.await?;
    tracing::info!("Quizbot stopped");
    Ok(())
}
