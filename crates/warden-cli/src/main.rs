#![deny(unsafe_code)]

//! warden CLI: runs the daemon and drives it over its control socket.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_config::AppConfig;
use warden_core::{ControlClient, Daemon};

/// warden: a daemon with a local Unix-socket control channel.
#[derive(Parser)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Control socket path, overriding the configuration.
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the warden daemon in the foreground.
    Start,

    /// Stop a running warden daemon.
    Stop,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config, cli.socket.as_deref()).await?;

    // -v flags win over the configured level
    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Start => cmd_start(config).await?,
        Commands::Stop => cmd_stop(&config).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

async fn cmd_start(config: AppConfig) -> Result<()> {
    info!(socket = %config.socket_path().display(), "Starting warden daemon");

    let daemon = Daemon::new(config);
    daemon.run().await.context("daemon failed")?;

    Ok(())
}

async fn cmd_stop(config: &AppConfig) -> Result<()> {
    let path = config.socket_path();
    info!(socket = %path.display(), "Sending stop command to warden daemon");

    let mut client = ControlClient::connect(&path).await?;
    client.stop().await?;
    println!("Stop requested.");
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn load_config(path: &Path, socket: Option<&Path>) -> Result<AppConfig> {
    let mut config = if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("invalid configuration in {}", path.display()))?
    } else {
        AppConfig::default()
    };
    if let Some(socket) = socket {
        config.control.socket_path = Some(socket.display().to_string());
        config.validate()?;
    }
    Ok(config)
}
