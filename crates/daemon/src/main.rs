//! Tether daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use daemon::{bridge, Config, JsonFileStore, SessionRegistry, SpawnConfig};

#[derive(Parser, Debug)]
#[command(name = "tether-daemon", version, about = "Persistent terminal session host")]
struct Cli {
    /// Path to the configuration file. Defaults to
    /// ~/.config/tether/config.toml when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file.
    #[arg(short, long)]
    bind: Option<String>,

    /// Default command for new sessions, overriding the configuration file.
    #[arg(long)]
    command: Option<String>,

    /// Session metadata store path, overriding the configuration file.
    #[arg(long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(bind) = cli.bind {
        config.daemon.bind = bind;
    }
    if let Some(command) = cli.command {
        config.session.default_command = command;
    }
    if let Some(store_path) = cli.store {
        config.store.path = store_path;
    }
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.daemon.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = Arc::new(
        JsonFileStore::new(config.store.path.clone())
            .with_context(|| format!("failed to open store at {}", config.store.path.display()))?,
    );
    let defaults = SpawnConfig {
        command: config.session.default_command.clone(),
        cwd: config.session.default_cwd.clone(),
        cols: 80,
        rows: 24,
        ..Default::default()
    };
    let registry = Arc::new(SessionRegistry::new(store, defaults));

    let listener = TcpListener::bind(&config.daemon.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.daemon.bind))?;
    tracing::info!(addr = %config.daemon.bind, "Tether daemon listening");

    tokio::select! {
        _ = bridge::serve(listener, Arc::clone(&registry)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");
        }
    }

    // Sessions do not outlive the daemon.
    registry.destroy_all().await;
    tracing::info!("All sessions destroyed, exiting");
    Ok(())
}
