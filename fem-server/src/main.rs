//! # fem-server
//!
//! Runs the dissemination drain for the configured tenants against
//! Postgres. Callback ingestion and the admin façade live in `fem-core`;
//! this binary owns migrations, the connection pool and the scheduler
//! lifecycle.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fem_core::{
    DisseminationScheduler, FeatureRequestService, MIGRATOR,
    database::infrastructure::postgres::postgres_stores,
};
use fem_model::TenantId;
use fem_server::config::{ConfigLoader, ConfigLoaderOptions, ServerConfig};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "fem-server")]
#[command(about = "Feature request lifecycle and dissemination drain")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "FEM_CONFIG")]
    config: Option<PathBuf>,

    /// Alternate .env file.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Tenants to drain, comma separated. Replaces the configured list.
    #[arg(long, value_delimiter = ',')]
    tenants: Option<Vec<String>>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the dissemination scheduler until interrupted (default).
    Run {
        /// Apply pending migrations before starting.
        #[arg(long)]
        migrate: bool,
    },
    /// Apply pending migrations and exit.
    Migrate,
    /// Drain one tenant's intent queue once and exit.
    Drain {
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let load = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
        tenants: cli.tenants.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,fem_core=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load.config;
    if config.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.config_path.as_ref() {
        info!(path = %path.display(), "configuration loaded from file");
    }
    for warning in &load.warnings {
        warn!(message = %warning, "configuration warning");
    }

    let pool = connect(&config).await?;

    match cli.command.unwrap_or(Command::Run { migrate: false }) {
        Command::Migrate => migrate(&pool).await,
        Command::Drain { tenant } => drain_once(pool, config, TenantId::new(tenant)).await,
        Command::Run { migrate: run_migrations } => {
            if run_migrations {
                migrate(&pool).await?;
            }
            run(pool, config).await
        }
    }
}

async fn connect(config: &ServerConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to apply migrations")?;
    info!("migrations applied");
    Ok(())
}

async fn drain_once(
    pool: PgPool,
    config: ServerConfig,
    tenant: TenantId,
) -> anyhow::Result<()> {
    let stores = postgres_stores(pool);
    let dissemination = config.fem.dissemination.clone();
    let service = FeatureRequestService::new(&stores, config.fem);
    let scheduler = DisseminationScheduler::new(
        service.processor().clone(),
        stores.lease.clone(),
        vec![tenant.clone()],
        dissemination,
    );

    match scheduler.drain_tenant(&tenant).await? {
        Some(report) => info!(
            %tenant,
            pages = report.pages,
            consumed = report.intents_consumed,
            applied = report.intents_applied,
            unblocked = report.requests_unblocked,
            "drain finished"
        ),
        None => warn!(%tenant, "drain lease held elsewhere, nothing done"),
    }
    Ok(())
}

async fn run(pool: PgPool, config: ServerConfig) -> anyhow::Result<()> {
    let stores = postgres_stores(pool);
    let tenants = config.fem.tenants.clone();
    let dissemination = config.fem.dissemination.clone();
    let service = FeatureRequestService::new(&stores, config.fem);

    if tenants.is_empty() {
        warn!("no tenant configured; scheduler will idle");
    }

    let shutdown = CancellationToken::new();
    let handle = DisseminationScheduler::new(
        service.processor().clone(),
        stores.lease.clone(),
        tenants,
        dissemination,
    )
    .spawn(shutdown.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    shutdown.cancel();
    handle.await.context("scheduler task panicked")?;
    Ok(())
}
