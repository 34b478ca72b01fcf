use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::header::BLOCK_VERSION;
use crate::ingest::DEFAULT_SCRIPT_HEX;
use crate::submission::LoopConfig;

/// Polls a Bitcoin node for chain-tip state, assembles candidate headers and
/// submits them back.
#[derive(Debug, Parser)]
#[command(name = "bitcoin_submitter", version)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the snapshot table if it does not exist.
    Setup,

    /// Fetch the node's chain tip once and store it.
    Ingest(IngestArgs),

    /// Print the most recent stored snapshot.
    Latest,

    /// Run the submission loop until interrupted.
    Run {
        /// Ingest one snapshot before the loop starts.
        #[arg(long)]
        ingest_first: bool,

        #[command(flatten)]
        ingest: IngestArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct IngestArgs {
    /// Block to describe; defaults to the node's best block.
    #[arg(long)]
    pub block_hash: Option<String>,

    /// Script decoded with `decodescript`.
    #[arg(long, default_value = DEFAULT_SCRIPT_HEX)]
    pub script_hex: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Static configuration, read once at startup from flags or the environment.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// JSON-RPC endpoint of the node.
    #[arg(long, env = "NODE_RPC_URL", global = true)]
    pub node_rpc_url: Option<String>,

    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::Postgres, global = true)]
    pub store_backend: StoreBackend,

    #[arg(long, env = "POOL_SIZE", default_value_t = 4, global = true)]
    pub pool_size: u32,

    #[arg(long, env = "SUBMIT_INTERVAL_SECS", value_parser = clap::value_parser!(u64).range(1..), default_value_t = 5, global = true)]
    pub submit_interval_secs: u64,

    #[arg(long, env = "MAX_BACKOFF_SECS", value_parser = clap::value_parser!(u64).range(1..), default_value_t = 60, global = true)]
    pub max_backoff_secs: u64,

    #[arg(long, env = "RPC_TIMEOUT_SECS", value_parser = clap::value_parser!(u64).range(1..), default_value_t = 30, global = true)]
    pub rpc_timeout_secs: u64,

    #[arg(long, env = "STORE_TIMEOUT_SECS", value_parser = clap::value_parser!(u64).range(1..), default_value_t = 10, global = true)]
    pub store_timeout_secs: u64,

    /// Payout address. Carried for coinbase construction; the loop does not use it yet.
    #[arg(long, env = "REWARD_ADDRESS", default_value = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", global = true)]
    pub reward_address: String,
}

impl Settings {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            interval: Duration::from_secs(self.submit_interval_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            version: BLOCK_VERSION,
        }
    }
}
