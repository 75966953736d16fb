//! gatekeep-rc - gate reconciliation service
//!
//! Composition root: loads configuration, opens the database, wires the store,
//! event bus, reconciler and scheduler together and serves the HTTP control surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gatekeep_common::config::{load_toml_config, resolve_config_path, TomlConfig};
use gatekeep_common::db::{init_database, settings::get_setting};
use gatekeep_common::events::EventBus;
use sqlx::SqlitePool;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeep_rc::reconcile::{ReconcileSettings, Reconciler, ReconciliationScheduler};
use gatekeep_rc::store::{GateStore, SqliteGateStore};
use gatekeep_rc::{build_router, AppState};

/// Command-line arguments for gatekeep-rc
#[derive(Parser, Debug)]
#[command(name = "gatekeep-rc")]
#[command(about = "Gate deduplication and promotion service")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "GATEKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the SQLite database (overrides the config file)
    #[arg(short, long, env = "GATEKEEP_DATABASE")]
    database: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "GATEKEEP_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting gatekeep-rc v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using defaults"),
    }

    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let db_path = config.resolved_database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    apply_database_overrides(&pool, &mut config).await;

    let events = EventBus::new(config.scheduler.event_bus_capacity);
    let store: Arc<dyn GateStore> = Arc::new(SqliteGateStore::new(pool));
    let reconciler = Arc::new(Reconciler::new(
        store,
        events.clone(),
        ReconcileSettings::from_config(&config),
    ));
    let (scheduler, scheduler_task) =
        ReconciliationScheduler::start(reconciler, config.scheduler.clone());

    let app = build_router(AppState::new(scheduler.clone(), events));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("gatekeep-rc listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Let an in-flight cycle finish its writes before exiting
    scheduler.shutdown();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Runtime settings stored in the database win over the TOML file
async fn apply_database_overrides(pool: &SqlitePool, config: &mut TomlConfig) {
    match get_setting::<bool>(pool, "reconcile_enabled").await {
        Ok(Some(enabled)) => {
            info!("reconcile_enabled = {} (database setting)", enabled);
            config.scheduler.enabled = enabled;
        }
        Ok(None) => {}
        Err(e) => warn!("Could not read reconcile_enabled setting: {}", e),
    }

    match get_setting::<u64>(pool, "reconcile_interval_secs").await {
        Ok(Some(0)) => warn!("Ignoring reconcile_interval_secs = 0 (database setting)"),
        Ok(Some(secs)) => {
            info!("reconcile_interval_secs = {} (database setting)", secs);
            config.scheduler.interval_secs = secs;
        }
        Ok(None) => {}
        Err(e) => warn!("Could not read reconcile_interval_secs setting: {}", e),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
