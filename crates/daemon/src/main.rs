// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `stepd` binary: the launcher daemon, plus the hidden
//! `session-manager` entry the daemon re-executes for each step.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use stepd_daemon::dispatch::Dispatcher;
use stepd_daemon::listener::{ListenCtx, Listener};
use stepd_daemon::{Config, DaemonError, StepRegistry};
use stepd_session::NullInterconnect;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepd", about = "node-level job step launcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the launcher daemon.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the Unix socket path.
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Internal: per-step session manager child.
    #[command(hide = true)]
    SessionManager,
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::SessionManager => {
            init_tracing(None);
            let code = stepd_session::session_main(&NullInterconnect);
            std::process::exit(code);
        }
        Command::Run { config, socket } => {
            let code = match run_daemon(config.as_deref(), socket) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("stepd: {}", e);
                    1
                }
            };
            std::process::exit(code);
        }
    }
}

fn init_tracing(log_path: Option<&std::path::Path>) {
    let filter = EnvFilter::try_from_env("STEPD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match log_path {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().map(PathBuf::from).unwrap_or_else(|| "stepd.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            builder.with_writer(appender).with_ansi(false).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
}

fn run_daemon(config_path: Option<&std::path::Path>, socket: Option<PathBuf>) -> Result<(), DaemonError> {
    let mut config = Config::load(config_path)?;
    if let Some(path) = socket {
        config.socket_path = path;
    }
    init_tracing(config.log_path.as_deref());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Io)?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), DaemonError> {
    // a previous unclean exit may have left the socket behind
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if let Some(dir) = config.socket_path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let unix = UnixListener::bind(&config.socket_path)
        .map_err(|e| DaemonError::BindFailed(config.socket_path.clone(), e))?;
    let tcp = match config.listen_addr {
        Some(addr) => Some(TcpListener::bind(addr).await.map_err(DaemonError::Io)?),
        None => None,
    };

    let socket_path = config.socket_path.clone();
    let shutdown = Arc::new(Notify::new());
    let config = Arc::new(config);
    let registry = Arc::new(StepRegistry::new(64));
    let dispatcher = Dispatcher::new(Arc::clone(&config), registry, Arc::new(NullInterconnect));
    let ctx = Arc::new(ListenCtx { dispatcher, shutdown: Arc::clone(&shutdown) });

    info!(socket = %socket_path.display(), node = %config.node_name, "stepd listening");

    let listener = match tcp {
        Some(tcp) => Listener::with_tcp(unix, tcp, Arc::clone(&ctx)),
        None => Listener::new(unix, Arc::clone(&ctx)),
    };
    let accept = tokio::spawn(listener.run());

    shutdown.notified().await;
    info!("shutting down");
    // let the acknowledging response reach the requester
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    accept.abort();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}
