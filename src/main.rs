#![forbid(unsafe_code)]

//! `agent-bridge`: drive a local coding agent from Slack conversations.
//!
//! Bootstraps configuration, opens the session store, starts the agent and
//! the per-chat orchestrator, then connects Slack Socket Mode.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::bridge::{Bridge, BridgeOptions};
use agent_bridge::chat::ChatPlatform;
use agent_bridge::config::GlobalConfig;
use agent_bridge::driver::{AgentLauncher, ProcessLauncher};
use agent_bridge::models::session::FreshnessPolicy;
use agent_bridge::persistence::db;
use agent_bridge::persistence::session_repo::SessionStore;
use agent_bridge::slack::client::SlackService;
use agent_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Chat-to-agent bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the agent's starting working directory.
    #[arg(long)]
    workdir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(dir) = args.workdir {
        config.set_working_dir(&dir)?;
    }
    config.load_credentials().await?;
    info!(working_dir = %config.working_dir.display(), "configuration loaded");

    // ── Session store ───────────────────────────────────
    let db_path = config.db_path();
    let db = Arc::new(db::connect(&db_path).await?);
    let store = SessionStore::new(db, FreshnessPolicy::from(&config.session));
    info!(db_path = %db_path.display(), "session store ready");

    // ── Slack sender ────────────────────────────────────
    let (slack, slack_queue_task) =
        SlackService::start(&config.slack, config.download_dir()).map_err(|err| {
            error!(%err, "slack service start failed");
            err
        })?;

    // ── Orchestrator ────────────────────────────────────
    let cancel = CancellationToken::new();
    let platform: Arc<dyn ChatPlatform> = Arc::clone(&slack) as Arc<dyn ChatPlatform>;
    let launcher: Arc<dyn AgentLauncher> = Arc::new(ProcessLauncher::new(config.agent.clone()));
    let bridge = Bridge::start(
        platform,
        launcher,
        store,
        &config.working_dir,
        BridgeOptions::from(&config),
        cancel.clone(),
    )
    .await?;

    // ── Socket Mode ─────────────────────────────────────
    let socket_task = slack.spawn_socket_mode(bridge.clone());
    info!("agent-bridge ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    bridge.shutdown().await;
    socket_task.abort();
    drop(bridge);
    drop(slack);
    // The sender drains whatever is already queued once every handle is gone;
    // the socket listener may still hold one, so do not wait forever.
    if tokio::time::timeout(std::time::Duration::from_secs(5), slack_queue_task)
        .await
        .is_err()
    {
        info!("slack sender still busy at exit");
    }

    info!("agent-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
