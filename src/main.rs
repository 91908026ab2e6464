use std::str::FromStr;
use std::sync::Arc;

use bitcoin::Network;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use lumen::actors::NodeSupervisor;
use lumen::chain::BitcoindClient;
use lumen::events::EventBus;
use lumen::router::types::init_chain_hash;
use lumen::router::MemoryStore;
use lumen::tasks::{
    cancel_tasks_and_wait_for_completion, new_tokio_cancellation_token, new_tokio_task_tracker,
};
use lumen::{start_chain, start_router, Config};

#[tokio::main]
async fn main() -> lumen::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::parse();

    let network = match &config.chain.network {
        Some(name) => Network::from_str(name)
            .unwrap_or_else(|_| panic!("unknown bitcoin network {:?}", name)),
        None => Network::Bitcoin,
    };
    init_chain_hash(network);

    let tracker = new_tokio_task_tracker();
    let token = new_tokio_cancellation_token();
    let supervisor = NodeSupervisor::start(tracker, token).await;

    let client = Arc::new(BitcoindClient::new(
        &config.chain.bitcoind_rpc_url,
        config.chain.bitcoind_rpc_user.clone(),
        config.chain.bitcoind_rpc_password.clone(),
    )?);
    let (chain_actor, block_count) =
        start_chain(&config.chain, client, supervisor.get_cell()).await?;
    info!("Chain watcher started on {}", network);

    let events = EventBus::new();
    let (_router_actor, _outbound) = start_router(
        &config.router,
        MemoryStore::new(),
        chain_actor,
        block_count,
        events,
        supervisor.get_cell(),
    )
    .await?;
    info!("Gossip router started");

    tokio::signal::ctrl_c().await?;
    info!("Received ctrl-c, shutting down");
    cancel_tasks_and_wait_for_completion().await;
    Ok(())
}
