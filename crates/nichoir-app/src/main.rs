//! Nichoir application binary - composition root.
//!
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Open the SQLite record store
//! 3. Reconcile records against the image directory
//! 4. Start the viewer API (optional)
//! 5. Run the broker link until interrupted or fatally disconnected

mod cli;
mod publish;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use nichoir_api::state::AppState;
use nichoir_core::config::NichoirConfig;
use nichoir_core::error::NichoirError;
use nichoir_ingest::{Backoff, BrokerLink, ClientBuilder, ImagePersister, TopicRouter};
use nichoir_storage::{Database, ImageRepository, IntegrityReconciler};

use cli::{CliArgs, Command};

/// Read the config file; a missing file means defaults, anything else is an error.
fn load_config(path: &Path) -> Result<(NichoirConfig, bool), NichoirError> {
    if !path.exists() {
        return Ok((NichoirConfig::default(), false));
    }
    Ok((NichoirConfig::load(path)?, true))
}

fn open_database(config: &NichoirConfig) -> Result<Arc<Database>, NichoirError> {
    let db = Database::new(&config.database_path())?;
    if let Some(path) = db.path() {
        tracing::info!(path = %path.display(), "SQLite database opened");
    }
    Ok(Arc::new(db))
}

/// Cancel `token` on Ctrl-C.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                token.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

async fn run_ingest(config: NichoirConfig) -> Result<(), NichoirError> {
    let db = open_database(&config)?;
    let repository = ImageRepository::new(Arc::clone(&db));

    // A failed reconciliation never blocks ingestion.
    match IntegrityReconciler::new(&repository).run() {
        Ok(report) => tracing::debug!(?report, "Startup reconciliation done"),
        Err(e) => tracing::error!(error = %e, "Startup reconciliation failed, continuing"),
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    // === Viewer API ===

    let api_task = if config.api.enabled {
        let state = AppState::new(config.clone(), Arc::clone(&db));
        let token = cancel.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = nichoir_api::start_server(state, shutdown).await {
                tracing::error!(error = %e, "Viewer API stopped");
            }
        }))
    } else {
        tracing::info!("Viewer API disabled");
        None
    };

    // === Ingestion ===

    let image_dir = config.image_dir();
    tracing::info!(dir = %image_dir.display(), "Images will be stored here");

    let persister = ImagePersister::new(image_dir, config.storage.image_extension.clone());
    let mut router = TopicRouter::new(
        config.broker.image_topic.clone(),
        config.broker.telemetry_topic.clone(),
        persister,
        Arc::new(repository),
    )
    .with_default_comment(config.storage.default_comment.clone());

    let topics = router.topics().iter().map(|t| t.to_string()).collect();
    let mut link = BrokerLink::new(
        ClientBuilder::from_config(&config.broker)?,
        topics,
        Backoff::from_config(&config.broker.reconnect),
    );

    let result = link.run(&mut router, cancel.clone()).await;

    cancel.cancel();
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Viewer API task panicked");
        }
    }

    match &result {
        Ok(()) => tracing::info!(received = link.received(), "Nichoir stopped"),
        Err(e) => tracing::error!(error = %e, "Ingestion stopped on a fatal error"),
    }
    result
}

fn run_reconcile(config: &NichoirConfig) -> Result<(), NichoirError> {
    let db = open_database(config)?;
    let repository = ImageRepository::new(db);
    let report = IntegrityReconciler::new(&repository).run()?;
    println!(
        "scanned: {}, deleted: {}, failed: {}, unchecked: {}",
        report.scanned, report.deleted, report.failed, report.unchecked
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let (mut config, from_file) = load_config(&config_file)?;
    args.apply(&mut config);
    config.validate()?;

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.resolve_log_level(&config))),
        )
        .init();

    tracing::info!("Starting Nichoir v{}", env!("CARGO_PKG_VERSION"));
    if from_file {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No configuration file, using defaults");
    }

    match args.command() {
        Command::Run => run_ingest(config).await?,
        Command::Reconcile => run_reconcile(&config)?,
        Command::Publish(publish_args) => {
            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone());
            let sent = publish::run(&publish_args, &config, cancel).await?;
            tracing::info!(sent, "Publishing finished");
        }
    }

    Ok(())
}
