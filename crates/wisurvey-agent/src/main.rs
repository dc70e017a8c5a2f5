//! Wi-Fi Survey Agent
//!
//! Single binary that runs on the survey laptop:
//! - REST API for the browser frontend (sessions, points, captures, results)
//! - Capture scheduling against the local radio and spectrum analyser
//! - Static serving of the frontend

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wisurvey_agent::state::AppState;
use wisurvey_core::SurveyService;
use wisurvey_core::store::SurveyStore;

/// Wi-Fi field survey agent.
#[derive(Parser, Debug)]
#[command(name = "wisurvey-agent", about = "Wi-Fi field survey agent")]
struct Cli {
    /// Capture configuration file (scanner commands, capture limits).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory holding one folder per survey session.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:4567")]
    listen_addr: SocketAddr,

    /// Frontend directory served at `/`.
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // ── Config ──────────────────────────────────────────────────
    let config = wisurvey_core::config::load(&cli.config)?;
    tracing::info!(
        rounds = config.rounds,
        max_samples = config.max_samples,
        sample_timeout_s = config.sample_timeout.as_secs(),
        scan_cmd = %config.commands.channel_scan,
        "capture config"
    );

    // ── Store + service ─────────────────────────────────────────
    tokio::fs::create_dir_all(&cli.data_dir).await?;
    let service = SurveyService::new(SurveyStore::new(&cli.data_dir), config);
    let recovered = service.recover_stale().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "reset captures interrupted by a previous shutdown");
    }
    let state = AppState::new(service);

    // ── Router ──────────────────────────────────────────────────
    let public_dir = if cli.public_dir.is_dir() {
        Some(cli.public_dir.as_path())
    } else {
        tracing::warn!(dir = %cli.public_dir.display(), "frontend directory missing, serving API only");
        None
    };
    let app = wisurvey_agent::app(state, public_dir);

    // ── Listen ──────────────────────────────────────────────────
    tracing::info!(
        data_dir = %cli.data_dir.display(),
        "wisurvey-agent listening on http://{}",
        cli.listen_addr
    );
    let listener = tokio::net::TcpListener::bind(cli.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("received SIGINT, shutting down"),
                Err(e) => {
                    tracing::error!("cannot listen for SIGINT: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    tracing::info!("wisurvey-agent stopped");
    Ok(())
}
