//! Vessel
//!
//! Terminal session manager serving the bridge protocol.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use vessel::bridge::get_socket_path;
use vessel::config::{default_config_path, Config};

/// Vessel - terminal session manager and split-pane layout engine.
#[derive(Parser, Debug)]
#[command(name = "vessel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve the bridge on a Unix socket until interrupted
    Serve {
        /// Socket path (overrides the configured and default path)
        #[arg(long, short, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    let overrides = config.apply_env_overrides();
    config.validate()?;

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    for var in &overrides {
        tracing::info!(variable = *var, "Configuration overridden from environment");
    }

    match cli.command {
        Commands::Serve { socket } => {
            let socket = socket
                .or_else(|| config.daemon.socket_path.clone())
                .unwrap_or_else(get_socket_path);
            tracing::info!(config = %config_path.display(), "Vessel starting");
            serve(socket, config).await?;
        }
        Commands::Config { path } => {
            if path {
                println!("{}", config_path.display());
            } else {
                print!("{}", config.to_toml()?);
            }
        }
    }

    Ok(())
}

/// Run the bridge listener until SIGINT or SIGTERM.
#[cfg(unix)]
async fn serve(socket: PathBuf, config: Config) -> anyhow::Result<()> {
    use tokio_util::sync::CancellationToken;
    use vessel::bridge::BridgeListener;

    let listener = BridgeListener::bind(&socket, config.session)
        .await
        .with_context(|| format!("Failed to bind bridge socket: {}", socket.display()))?;

    let shutdown = CancellationToken::new();
    let run = tokio::spawn(listener.run(shutdown.clone()));

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    shutdown.cancel();
    run.await.context("Bridge listener task failed")??;

    tracing::info!("Vessel stopped");
    Ok(())
}

#[cfg(not(unix))]
async fn serve(socket: PathBuf, _config: Config) -> anyhow::Result<()> {
    anyhow::bail!(
        "serving the bridge requires Unix domain sockets ({})",
        socket.display()
    )
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
