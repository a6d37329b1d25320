//! Tunnelgate CLI - configuration tooling for the gateway

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tunnelgate::{init_tracing, GatewayConfig};

/// Tunnelgate - terminal gateway to overlay agents
#[derive(Parser, Debug)]
#[command(name = "tunnelgate")]
#[command(about = "Tunnelgate - terminal gateway to overlay agents")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Where to write the file
        #[arg(long, default_value = "tunnelgate.yml", env = "TUNNELGATE_CONFIG")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file and print the effective settings
    Check {
        #[arg(default_value = "tunnelgate.yml", env = "TUNNELGATE_CONFIG")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
            }
            std::fs::write(&path, GatewayConfig::template())
                .with_context(|| format!("Failed to write config file: {:?}", path))?;
            info!("Wrote {:?}", path);
        }
        Commands::Check { path } => {
            let config = GatewayConfig::load(&path)?;
            let relay_map = config.relay_map()?;

            info!("Config OK: {:?}", path);
            info!("Listen: {}", config.listen);
            info!(
                "Relay regions: {} ({} embedded, tag {:?})",
                relay_map.regions.len(),
                relay_map.embedded_regions().count(),
                config.relay.tag
            );
            info!(
                "Reachable timeout: {:?}, idle timeout: {:?}",
                config.dialer_config().reachable_timeout,
                config.idle_timeout()
            );
            info!(
                "Heartbeat: {:?}, drain timeout: {:?}",
                config.proxy_config().heartbeat_interval,
                config.drain_timeout()
            );
        }
    }

    Ok(())
}
