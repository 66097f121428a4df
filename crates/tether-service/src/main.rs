//! Tether Service - BLE link maintenance daemon and HTTP control API.
//!
//! Run with: `cargo run -p tether-service`

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use tether_core::{BtleLink, LinkConfig, link_channel};
use tether_service::{AppState, Config, TargetStore, api};

mod service;

/// Tether Service - keeps one BLE link alive from the background.
#[derive(Parser, Debug)]
#[command(name = "tether-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Target file path (overrides config).
    #[arg(short, long, global = true)]
    target_file: Option<PathBuf>,

    /// Do not resume a persisted target at startup.
    #[arg(long, global = true)]
    no_resume: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground (default behavior).
    Run,

    /// Manage the background service.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
}

#[derive(Subcommand, Debug)]
enum ServiceAction {
    /// Install tether-service as a system service.
    Install {
        /// Install as user-level service (no root/admin required).
        #[arg(long)]
        user: bool,
    },

    /// Uninstall the tether-service system service.
    Uninstall {
        /// Uninstall user-level service.
        #[arg(long)]
        user: bool,
    },

    /// Start the tether-service system service.
    Start {
        /// Start user-level service.
        #[arg(long)]
        user: bool,
    },

    /// Stop the tether-service system service.
    Stop {
        /// Stop user-level service.
        #[arg(long)]
        user: bool,
    },

    /// Check whether the daemon is up, via its own health endpoint.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Service { action }) => {
            handle_service_action(action, args.config, args.bind).await
        }
        Some(Command::Run) | None => run_server(args).await,
    }
}

async fn handle_service_action(
    action: ServiceAction,
    config: Option<PathBuf>,
    bind: Option<String>,
) -> anyhow::Result<()> {
    use service::{Control, Level, Liveness};

    fn level_of(user: bool) -> Level {
        if user { Level::User } else { Level::System }
    }

    let (action_name, result) = match action {
        ServiceAction::Install { user } => ("install", Control::new(level_of(user))?.install()),
        ServiceAction::Uninstall { user } => {
            ("uninstall", Control::new(level_of(user))?.uninstall())
        }
        ServiceAction::Start { user } => ("start", Control::new(level_of(user))?.start()),
        ServiceAction::Stop { user } => ("stop", Control::new(level_of(user))?.stop()),
        ServiceAction::Status => {
            let bind = match bind {
                Some(bind) => bind,
                None => {
                    let config = match config {
                        Some(path) => Config::load(&path)?,
                        None => Config::load_default().unwrap_or_default(),
                    };
                    config.server.bind
                }
            };
            match service::probe(&bind).await {
                Liveness::Running { version } => {
                    println!("tether-service {version} is running at {bind}");
                }
                Liveness::Unreachable => {
                    println!("tether-service is not responding at {bind}");
                }
            }
            return Ok(());
        }
    };

    match result {
        Ok(()) => {
            println!("Successfully {}ed tether-service", action_name);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to {} service: {}", action_name, e);
            Err(e.into())
        }
    }
}

async fn run_server(args: Args) -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tether_service=info".parse()?)
                .add_directive("tether_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(target_file) = args.target_file {
        config.storage.path = target_file;
    }
    config.validate()?;

    // Spawn the connection supervisor
    let (link_tx, link_rx) = link_channel();
    let driver = Box::new(BtleLink::new(link_tx, LinkConfig::default()));
    let supervisor = tether_core::spawn(driver, link_rx, config.link.to_policy())?;

    // Resume a persisted target from before the restart or reboot
    let store = TargetStore::new(&config.storage.path);
    let persisted = if args.no_resume { None } else { store.load() };
    let state = AppState::new(supervisor, store, config.clone());
    if let Some(target) = persisted {
        info!(target = %target, "Resuming persisted target");
        *state.target.write().await = Some(target.clone());
        state.supervisor.start(target).await?;
    }

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse()?;

    info!("Starting server on {}", addr);

    // Run the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
