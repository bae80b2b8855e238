//! Vellum CMS Kernel
//!
//! HTTP server, schema migration and job draining.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vellum_kernel::{AppState, Config, routes};

#[derive(Debug, Parser)]
#[command(name = "vellum", version, about = "Vellum headless CMS")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate the schema and serve HTTP (default).
    Serve,

    /// Bring the store's tables up to date.
    Migrate {
        /// Also drop columns and indexes that are no longer declared.
        #[arg(long)]
        allow_destructive: bool,

        /// Print the plan without applying it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Process every queued job, then exit.
    DrainJobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    info!(port = config.port, "configuration loaded");

    let state = AppState::from_config(config, Vec::new())
        .await
        .context("failed to initialize application state")?;

    let report = state.boot_report();
    if !report.is_clean() {
        warn!(
            errors = report.error_count(),
            "booted with registration errors"
        );
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::Migrate {
            allow_destructive,
            dry_run,
        } => migrate(&state, allow_destructive, dry_run).await,
        Command::DrainJobs => drain_jobs(&state).await,
    }
}

async fn serve(state: AppState) -> Result<()> {
    let allow_destructive = state.config().allow_destructive_migrations;
    state
        .migrate(allow_destructive)
        .await
        .context("failed to migrate schema")?;

    let queue = state.job_queue();
    let _worker = queue.spawn_worker();
    let _timers = queue.start_interval_jobs();

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config().port));
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn migrate(state: &AppState, allow_destructive: bool, dry_run: bool) -> Result<()> {
    if dry_run {
        let plan = state
            .migration_plan(allow_destructive)
            .await
            .context("failed to plan migration")?;
        if plan.is_empty() {
            info!("schema is up to date");
        }
        for change in &plan.changes {
            info!(change = %change, "would apply");
        }
        for change in &plan.skipped {
            info!(change = %change, "would skip (destructive)");
        }
        return Ok(());
    }

    let report = state
        .migrate(allow_destructive)
        .await
        .context("failed to migrate schema")?;
    info!(
        applied = report.applied,
        skipped = report.skipped,
        created = ?report.created_tables,
        "migration finished"
    );
    Ok(())
}

async fn drain_jobs(state: &AppState) -> Result<()> {
    let results = state
        .job_queue()
        .process_job_queue()
        .await
        .context("failed to drain job queue")?;
    let failed = results.iter().filter(|r| !r.success).count();
    info!(processed = results.len(), failed, "job queue drained");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vellum_kernel=debug,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
