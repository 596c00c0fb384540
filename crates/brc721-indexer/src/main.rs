use anyhow::{Context, Result};
use brc721_indexer::config::Config;
use brc721_indexer::queue::BlockQueue;
use brc721_indexer::rpc::JsonRpcClient;
use brc721_indexer::{bootstrap, Indexer, RedbStore};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let initial = config
        .network
        .genesis_state()
        .context("invalid genesis block hash")?;

    let mut store = RedbStore::open(&config.data_path)
        .with_context(|| format!("failed to open store at {}", config.data_path.display()))?;
    let rpc = config.rpc_config();
    log::info!("using node at {}", rpc.url);
    let node = JsonRpcClient::new(rpc).context("failed to build RPC client")?;

    let (queue, mut receiver) = BlockQueue::new();
    bootstrap(&mut store, &queue, &mut receiver, initial, config.reindex)
        .context("failed to prepare block worker")?;
    log::info!("block worker is ready");

    let mut indexer = Indexer::new(node, store, queue).with_poll_interval(config.poll_interval());
    indexer
        .run(&mut receiver)
        .await
        .context("block worker stopped")?;
    Ok(())
}
