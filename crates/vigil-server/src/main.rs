use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil_core::app::{AppContext, Stores, engine_for};
use vigil_core::error::Result;
use vigil_server::config::{ServerConfig, load_server_config};
use vigil_server::state::AppState;
use vigil_server::{background, handlers};

#[derive(Parser)]
#[command(name = "vigil-server", version, about = "vigil backup control plane")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides server.listen)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log output format: "json" or "pretty" (overrides server.log_format)
    #[arg(long)]
    log_format: Option<String>,

    /// Maximum number of blocking threads for engine calls (minimum 1)
    #[arg(long, default_value_t = 16, value_parser = parse_min_one)]
    max_blocking_threads: usize,

    /// Number of tokio worker threads (minimum 1)
    #[arg(long, default_value_t = 4, value_parser = parse_min_one)]
    worker_threads: usize,
}

fn parse_min_one(s: &str) -> std::result::Result<usize, String> {
    let n: usize = s.parse().map_err(|e| format!("{e}"))?;
    if n == 0 {
        return Err("value must be at least 1".into());
    }
    Ok(n)
}

fn main() {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.worker_threads)
        .max_blocking_threads(cli.max_blocking_threads)
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error: failed to build tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(e) = runtime.block_on(async_main(cli)) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = load_server_config(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(format) = cli.log_format {
        config.server.log_format = format;
    }
    init_tracing(&config);

    let ctx = build_context(config.vigil).await?;
    background::spawn_all(&ctx)?;

    let listen_addr = config.server.listen.clone();
    let app = handlers::router(AppState::new(config.server, Arc::clone(&ctx)));

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("vigil-server listening on {listen_addr}");
    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    ctx.shutdown().await;
    serve?;
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    match config.server.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Open the stores, seed configured repositories, load them and settle
/// tasks left over from a previous run.
async fn build_context(config: vigil_core::config::VigilConfig) -> Result<Arc<AppContext>> {
    let engine = engine_for(&config.data.engine)?;
    let stores = Stores::open_json(Path::new(&config.data.dir))?;
    let ctx = AppContext::new(config, engine, stores)?;

    let added = ctx.seed_repositories()?;
    if added > 0 {
        info!(added, "seeded repositories from config");
    }
    let report = ctx.reload_repositories().await?;
    for (repo_id, error) in &report.failed {
        warn!(repo_id, error = %error, "repository not loaded");
    }
    info!(loaded = report.loaded.len(), "repositories loaded");

    let reconciled = ctx.reconcile_tasks()?;
    info!(
        interrupted = reconciled.interrupted.len(),
        completed = reconciled.completed.len(),
        "startup reconciliation done"
    );
    Ok(ctx)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received, stopping");
}
