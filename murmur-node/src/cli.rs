use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{NodeConfig, CONFIG_FILE};
use crate::error::NodeError;
use crate::simulate::SimulationOptions;

#[derive(Parser)]
#[command(
    name = "murmur",
    about = "murmur: serverless peer-to-peer mesh chat and calls",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        dir: String,
    },
    /// Create or unlock an identity and show its fingerprint
    Identity {
        /// Account label (defaults to [identity] account)
        #[arg(short, long)]
        account: Option<String>,
        /// List stored accounts instead
        #[arg(long, conflicts_with = "account")]
        list: bool,
    },
    /// List identities learned from the mesh
    Contacts {
        /// Delete the identity with this fingerprint
        #[arg(long, value_name = "FINGERPRINT")]
        forget: Option<String>,
    },
    /// Run an in-process mesh and report how messages spread
    Simulate {
        /// Number of peers
        #[arg(short, long, default_value_t = 12)]
        peers: usize,
        /// Messages to publish from random peers
        #[arg(short, long, default_value_t = 10)]
        messages: usize,
        /// Room name (defaults to [rendezvous] room)
        #[arg(long)]
        room: Option<String>,
        /// Seed for peer selection and node RNGs
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Seconds allowed for each join and for convergence
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

/// Logging level from the config file, if one can be read.
pub fn log_level(cli: &Cli) -> String {
    NodeConfig::load_or_default(&cli.config)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string())
}

pub async fn run(cli: Cli) -> Result<(), NodeError> {
    match cli.command {
        Command::Init { dir } => {
            let path = NodeConfig::init(&dir)?;
            tracing::info!("Configuration written to {}", path.display());
            Ok(())
        }
        Command::Identity { account, list } => {
            let config = NodeConfig::load_or_default(&cli.config)?;
            if list {
                crate::identity::list_accounts(&config)
            } else {
                crate::identity::run(&config, account)
            }
        }
        Command::Contacts { forget } => {
            let config = NodeConfig::load_or_default(&cli.config)?;
            match forget {
                Some(fingerprint) => crate::identity::run_forget(&config, &fingerprint),
                None => crate::identity::list_contacts(&config),
            }
        }
        Command::Simulate {
            peers,
            messages,
            room,
            seed,
            timeout,
        } => {
            let config = NodeConfig::load_or_default(&cli.config)?;
            let options = SimulationOptions {
                peers,
                messages,
                room: room.unwrap_or_else(|| config.rendezvous.room.clone()),
                seed,
                timeout: Duration::from_secs(timeout),
            };
            crate::simulate::run(options, &config.mesh).await
        }
    }
}
