//! Prism - security-token ledger projection indexer.
//!
//! # Usage
//!
//! ```bash
//! # Start with default config
//! prism
//!
//! # Start with environment overrides
//! DATABASE_URL=postgres://localhost/prism WS_URL=ws://localhost:9944 prism
//!
//! # Re-index from a given height after a purge
//! prism --purge -y && prism --start-block 1200000
//! ```

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};

use prism_core::error::IndexerError;
use prism_core::metrics::init_metrics;
use prism_core::ports::{BlockSource, ChainState};
use prism_core::services::{IndexerConfig, IndexerService};
use prism_handlers::{BundleRegistry, SweepConfig, default_bundles};
use prism_storage::{Database, DatabaseConfig, PgRepositories};
use prism_substrate::{SubstrateClient, SubstrateClientConfig};

/// Prism CLI - security-token ledger indexer.
#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(about = "Prism - projects security-token ledger events into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Node WebSocket URL.
    #[arg(long, env = "WS_URL", default_value = "ws://127.0.0.1:9944")]
    ws_url: String,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/prism"
    )]
    database_url: String,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// First block to index when no cursor is stored.
    #[arg(long, env = "START_BLOCK", default_value = "0")]
    start_block: u64,

    /// Attempts per block before the indexer stops.
    #[arg(long, env = "MAX_BLOCK_RETRIES", default_value = "5")]
    max_block_retries: u32,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,

    /// Purge all indexed data from the database and exit.
    ///
    /// This deletes blocks, extrinsics, events and every projected entity,
    /// and resets the indexer cursor. Schema and migrations are preserved.
    #[arg(long)]
    purge: bool,

    /// Skip confirmation prompt for destructive operations (like --purge).
    #[arg(long, short = 'y')]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Prism Indexer");
    debug!(ws_url = %cli.ws_url, "Node endpoint");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    info!("🗄️  Connecting to database...");
    let db = Database::connect(&DatabaseConfig::for_indexer(&cli.database_url))
        .await
        .context("Failed to connect to database")?;

    db.migrate().await.context("Failed to run migrations")?;
    info!("🗄️  Database ready (migrations applied)");

    // ─────────────────────────────────────────────────────────────────────────
    // 📦 HANDLER BUNDLES (register early for migrations and purge)
    // ─────────────────────────────────────────────────────────────────────────
    let mut bundle_registry = BundleRegistry::new();
    for bundle in default_bundles(SweepConfig::default()) {
        bundle_registry.register(bundle);
    }

    // Bundle views over the entity table
    bundle_registry
        .run_migrations(db.pool())
        .await
        .context("Failed to run bundle migrations")?;

    if cli.migrate_only {
        info!("🛑 --migrate-only flag set, exiting");
        return Ok(());
    }

    if cli.purge {
        return handle_purge(&db, &bundle_registry, cli.yes).await;
    }

    let db = Arc::new(db);
    let repositories = Arc::new(PgRepositories::new(db.clone()));

    // ─────────────────────────────────────────────────────────────────────────
    // 📡 NODE CONNECTION
    // ─────────────────────────────────────────────────────────────────────────
    info!("📡 Connecting to node...");
    let client = SubstrateClient::connect(SubstrateClientConfig {
        ws_url: cli.ws_url.clone(),
    })
    .await
    .context("Failed to connect to node")?;

    let client = Arc::new(client);

    let genesis_hash = client.genesis_hash().await?;
    let runtime = client.runtime_version().await?;
    let finalized = client.finalized_head().await?;

    info!(
        genesis = %hex::encode(&genesis_hash.0[..8]),
        spec_name = %runtime.spec_name,
        spec_version = runtime.spec_version,
        head = finalized.number,
        "🔗 Chain connected"
    );

    let handlers = Arc::new(bundle_registry.into_handler_registry());
    let chain_state: Arc<dyn ChainState> = client.clone();

    let indexer_config = IndexerConfig {
        chain_id: hex::encode(genesis_hash.0),
        start_block: cli.start_block,
        max_block_retries: cli.max_block_retries,
        ..Default::default()
    };

    let indexer = IndexerService::new(
        indexer_config,
        client.clone(),
        repositories,
        chain_state,
        handlers,
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (stopped_tx, mut stopped_rx) = watch::channel(false);

    let indexer_handle = tokio::spawn(
        async move {
            match indexer.run(shutdown_rx).await {
                Ok(()) | Err(IndexerError::ShutdownRequested) => {}
                Err(e @ IndexerError::ChainMismatch { .. }) => {
                    error!(error = %e, "❌ Database belongs to another chain");
                }
                Err(e) => error!(error = %e, "❌ Indexer stopped"),
            }
            let _ = stopped_tx.send(true);
        }
        .instrument(info_span!("indexer")),
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Prism ready");
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    // A fatal indexer error ends the process as well as a signal does
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = stopped_rx.changed() => {}
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(Duration::from_secs(30), indexer_handle).await {
        Ok(_) => debug!("Indexer stopped"),
        Err(_) => warn!("⚠️  Indexer shutdown timed out"),
    }

    db.close().await;

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Handle the --purge command.
async fn handle_purge(
    db: &Database,
    bundle_registry: &BundleRegistry,
    skip_confirmation: bool,
) -> Result<()> {
    warn!("⚠️  PURGE MODE: This will delete ALL indexed data!");
    warn!("   - All blocks, extrinsics, events");
    warn!(
        "   - Projected entities of bundles: {}",
        bundle_registry.bundle_names().join(", ")
    );
    warn!("   - The indexer cursor will be reset");
    warn!("   - Schema and migrations will be preserved");

    if !skip_confirmation {
        print!("\n🔴 Are you sure you want to purge all data? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("❌ Purge cancelled");
            return Ok(());
        }
    }

    info!("🗑️  Purging database...");

    let bundle_entities = bundle_registry
        .purge_entities(db.pool())
        .await
        .context("Failed to purge bundle entities")?;

    // Anything left in the entity table belongs to no registered bundle
    let stats = db.purge().await.context("Failed to purge database")?;

    info!("✅ Database purged successfully");
    info!("   📦 Blocks removed: {}", stats.blocks_removed);
    info!("   📝 Extrinsics removed: {}", stats.extrinsics_removed);
    info!("   📣 Events removed: {}", stats.events_removed);
    info!(
        "   🧩 Entities removed: {}",
        bundle_entities + stats.entities_removed
    );
    info!("   The indexer will start from the configured start block on next run");

    Ok(())
}
