use std::io::Read as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deforum_worker::server::{build_router, AppState};
use deforum_worker::{Orchestrator, WorkerConfig};

/// Slack on top of the job timeout before the HTTP layer gives up.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "deforum-worker", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one job and print its result as JSON.
    Run(RunArgs),
    /// Serve `POST /run` and `GET /health`.
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Event JSON file (`{"input": {...}}`). Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Bind address; overrides `HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Bind port; overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        mode = config.mode_name(),
        outdir = %config.outdir.display(),
        timeout_secs = config.job_timeout.as_secs(),
        "Loaded worker configuration",
    );

    match cli.cmd {
        Command::Run(args) => cmd_run(config, args).await,
        Command::Serve(args) => cmd_serve(config, args).await,
    }
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "deforum_worker=info,deforum_engine=info,deforum_cloud=info,deforum_events=info"
                    .into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn cmd_run(config: WorkerConfig, args: RunArgs) -> anyhow::Result<()> {
    let raw = match &args.input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read event from stdin")?;
            buf
        }
    };
    let event: Value = if raw.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&raw).context("Event is not valid JSON")?
    };

    let orchestrator = Orchestrator::new(config);
    match orchestrator.handle(&event).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            println!(
                "{}",
                json!({"status": "failed", "error": e.to_string(), "code": "VALIDATION_ERROR"})
            );
            Err(e.into())
        }
    }
}

async fn cmd_serve(config: WorkerConfig, args: ServeArgs) -> anyhow::Result<()> {
    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);
    let addr = SocketAddr::new(
        host.parse()
            .with_context(|| format!("Invalid bind address {host:?}"))?,
        port,
    );
    let request_timeout = config.job_timeout + REQUEST_TIMEOUT_SLACK;

    let state = AppState {
        orchestrator: Arc::new(Orchestrator::new(config)),
    };
    let app = build_router(state, request_timeout);

    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
