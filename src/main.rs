use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bitcoin_submitter::config::{Cli, Command, Settings, StoreBackend};
use bitcoin_submitter::database::{connect, setup_database, ChainTipStore, MemoryStore, PostgresStore};
use bitcoin_submitter::ingest::ingest;
use bitcoin_submitter::oracle::{PlaceholderGenerator, QubitOracle};
use bitcoin_submitter::rpc::{NodeRpc, RpcClient};
use bitcoin_submitter::submission::SubmissionLoop;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitcoin_submitter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;

    match cli.command {
        Command::Setup => {
            let pool = connect(database_url(&settings)?, settings.pool_size).await?;
            setup_database(&pool).await?;
            info!("Database schema setup complete");
        }
        Command::Ingest(args) => {
            let rpc = node_client(&settings)?;
            let store = open_store(&settings).await?;
            let (_, snapshot) = ingest(
                rpc.as_ref(),
                store.as_ref(),
                args.block_hash.as_deref(),
                &args.script_hex,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Latest => {
            let store = open_store(&settings).await?;
            match store.latest().await? {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => warn!("No chain tip snapshot in store"),
            }
        }
        Command::Run { ingest_first, ingest: args } => {
            let rpc = node_client(&settings)?;
            let store = open_store(&settings).await?;

            if ingest_first {
                ingest(
                    rpc.as_ref(),
                    store.as_ref(),
                    args.block_hash.as_deref(),
                    &args.script_hex,
                )
                .await?;
            }

            info!(
                node = %settings.node_rpc_url.as_deref().unwrap_or_default(),
                store = ?settings.store_backend,
                reward_address = %settings.reward_address,
                "Configuration loaded"
            );

            let generator = Box::new(PlaceholderGenerator::new(QubitOracle::new()));
            let submitter = SubmissionLoop::new(store, rpc, generator, settings.loop_config());
            submitter
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Failed to listen for ctrl-c");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
    }

    Ok(())
}

fn database_url(settings: &Settings) -> Result<&str, &'static str> {
    settings
        .database_url
        .as_deref()
        .ok_or("DATABASE_URL must be set in .env file or passed with --database-url")
}

fn node_client(settings: &Settings) -> Result<Arc<dyn NodeRpc>, Box<dyn std::error::Error>> {
    let url = settings
        .node_rpc_url
        .clone()
        .ok_or("NODE_RPC_URL must be set in .env file or passed with --node-rpc-url")?;
    Ok(Arc::new(RpcClient::new(url, settings.rpc_timeout())?))
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn ChainTipStore>, Box<dyn std::error::Error>> {
    match settings.store_backend {
        StoreBackend::Postgres => {
            let pool = connect(database_url(settings)?, settings.pool_size).await?;
            Ok(Arc::new(PostgresStore::new(pool)))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
