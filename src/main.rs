//! Shuffle Relay - Coordination server for coin shuffle pools

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shuffle_relay::config::{self, Config};
use shuffle_relay::{PacketVerifier, PoolTracker, Server};

/// Shuffle Relay - Coin shuffle coordination server
#[derive(Parser)]
#[command(name = "shuffle-relay")]
#[command(version)]
#[command(about = "Groups shuffle clients into pools and relays their packets", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Players needed to start a round
        #[arg(short = 's', long)]
        pool_size: Option<usize>,

        /// Log every inbound and outbound envelope
        #[arg(short, long)]
        debug: bool,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    match cli.command {
        Commands::Serve {
            port,
            pool_size,
            debug,
        } => {
            if let Some(port) = port {
                config.network.port = port;
            }
            if let Some(size) = pool_size {
                config.pool.size = size;
            }
            config.general.debug |= debug;

            run_server(config).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Run the relay until Ctrl+C
async fn run_server(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    tracing::info!(
        "Starting shuffle relay on port {} (pool size {})",
        config.network.port,
        config.pool.size
    );
    if config.general.debug {
        tracing::info!("Debug mode: logging all envelopes");
    }

    let mut server = Server::new(
        config.network_config(),
        PoolTracker::new(config.pool.size),
        PacketVerifier,
    );
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}
