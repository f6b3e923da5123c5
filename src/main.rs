//! quickauthd - keeps quick-auth captive portal accounts logged in
//!
//! Runs one session per configured account, each bound to its own network
//! interface, and logs every account out on SIGINT/SIGTERM.

mod config;
mod http;
mod iface;
mod models;
mod parser;
mod portal;
mod session;
mod supervisor;

use anyhow::{Context, Result};
use clap::Parser;
use iface::{InterfaceResolver, SystemProbe};
use portal::QuickAuthClient;
use session::{shutdown_channel, Session, SessionEnv};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use supervisor::{StatusBoard, Supervisor};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quickauthd")]
#[command(about = "Captive portal quick-auth keep-alive daemon", long_about = None)]
struct Args {
    /// Config file path (default: first of ./config.toml, /etc/quickauthd/config.toml,
    /// ~/.config/quickauthd/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one check cycle per account and exit without logging out
    #[arg(long, conflicts_with = "logout")]
    once: bool,

    /// Log every account out and exit
    #[arg(long)]
    logout: bool,
}

type Env = SessionEnv<QuickAuthClient, SystemProbe>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let cfg = config::Config::load(args.config.as_deref())?;

    init_logging(&cfg.logging)?;

    tracing::info!("quickauthd v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loaded {} account(s)", cfg.accounts.len());

    let (events, _) = broadcast::channel(256);
    let env = SessionEnv {
        portal: Arc::new(QuickAuthClient::new(cfg.http.clone())),
        resolver: Arc::new(InterfaceResolver::new(SystemProbe)),
        fallback: cfg.fallback.clone(),
        pause_cooldown: Duration::from_secs(cfg.session.pause_cooldown),
        events,
    };

    let code = if args.once {
        run_once(env, cfg.accounts).await
    } else if args.logout {
        run_logout(env, cfg.accounts).await
    } else {
        run_daemon(env, cfg.accounts).await
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Log to stdout, or append to `logging.file` when set. `RUST_LOG` wins over
/// the configured level.
fn init_logging(cfg: &config::LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    if cfg.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.file)
            .with_context(|| format!("Failed to open log file {}", cfg.file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

/// Run in daemon mode until a termination signal
async fn run_daemon(env: Env, accounts: Vec<config::AccountConfig>) -> i32 {
    let supervisor = Supervisor::new(env);
    let board = StatusBoard::default();
    tokio::spawn(board.clone().follow(supervisor.subscribe()));

    tracing::info!("Starting daemon mode...");
    let report = supervisor.run(accounts, wait_for_shutdown_signal()).await;

    for (account, phase) in board.snapshot() {
        tracing::debug!("[{}] Final state: {}", account, phase);
    }
    if !report.failed.is_empty() {
        tracing::warn!("Sessions ended with errors: {}", report.failed.join(", "));
    }
    report.exit_code()
}

/// One check cycle per account, concurrently
async fn run_once(env: Env, accounts: Vec<config::AccountConfig>) -> i32 {
    let (_trigger, shutdown) = shutdown_channel();
    let mut tasks = tokio::task::JoinSet::new();
    for account in accounts {
        let session = Session::new(account, env.clone(), shutdown.clone());
        tasks.spawn(session.run_once());
    }

    let mut code = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => code = 1,
            Ok(Err(e)) => {
                tracing::error!("{}", e);
                code = 1;
            }
            Err(e) => {
                tracing::error!("Session task aborted: {}", e);
                code = 1;
            }
        }
    }
    code
}

/// Log every account out using the configured fallbacks
async fn run_logout(env: Env, accounts: Vec<config::AccountConfig>) -> i32 {
    let (_trigger, shutdown) = shutdown_channel();
    let mut tasks = tokio::task::JoinSet::new();
    for account in accounts {
        let session = Session::new(account, env.clone(), shutdown.clone());
        tasks.spawn(session.logout_only());
    }

    let mut code = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("{}", e);
                code = 1;
            }
            Err(e) => {
                tracing::error!("Session task aborted: {}", e);
                code = 1;
            }
        }
    }
    code
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = signal_or_pending("Ctrl+C", tokio::signal::ctrl_c());

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Resolves when `signal` fires. A listener that failed to install never
/// resolves, so it cannot be mistaken for a termination request.
async fn signal_or_pending<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!("Failed to listen for {}: {}", name, e);
        std::future::pending::<()>().await;
    }
}
