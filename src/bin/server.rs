//! Code Dock server - HTTP job submission and live WebSocket observation.

use anyhow::Context;
use clap::Parser;
use codedock::config::{
    apply_env_overrides, load_config, load_config_from_path, validate_config, Config, LogConfig,
};
use codedock::server::{build_router, AppState};
use codedock::{Hub, Orchestrator, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Workspaces older than this at startup are crash leftovers
const STALE_WORKSPACE_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(
    name = "codedock-server",
    version = VERSION,
    about = "Code Dock - sandboxed execution server with live output streaming"
)]
struct Args {
    /// Configuration file (JSON5 or TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Port
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load(&args)?;
    init_logging(&config.log);

    info!("Starting Code Dock server v{}", VERSION);

    let validation = validate_config(&config);
    for issue in &validation.warnings {
        warn!("Config: {}", issue);
    }
    if !validation.valid {
        for issue in &validation.errors {
            error!("Config: {}", issue);
        }
        anyhow::bail!("invalid configuration ({} errors)", validation.errors.len());
    }

    let hub = Arc::new(Hub::new(config.execution.observer_buffer));
    let orchestrator =
        Orchestrator::new(&config, hub.clone()).context("failed to initialise the orchestrator")?;
    info!(
        "Interpreter: {}, workspaces under {}",
        orchestrator.policy().interpreter().display(),
        orchestrator.workspaces().root().display()
    );
    orchestrator.workspaces().sweep_stale(STALE_WORKSPACE_AGE);

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        hub: hub.clone(),
    };
    let app = build_router(state, config.server.cors_permissive);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    info!("Server stopped");
    Ok(())
}

fn load(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    Ok(config)
}

fn init_logging(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&log.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal(hub: Arc<Hub>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down");
    hub.shutdown().await;
}
