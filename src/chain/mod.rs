pub mod actor;
pub mod client;
pub mod config;
pub mod error;
pub mod watch;


use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use bitcoin::Txid;
use ractor::{Actor, ActorCell, ActorRef};
use ractor::concurrency::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use actor::{ChainActor, ChainMessage, ChannelValidation};
pub use client::{BitcoindClient, ChainRpc, TxBlockMeta, TxWithMeta};
pub use config::ChainConfig;
pub use error::ChainRpcError;
pub use watch::{Watch, WatchConsumer, WatchEvent, WatchTag};

use crate::tasks::{new_tokio_cancellation_token, new_tokio_task_tracker};

/// Spawn the chain watcher and the backend poller feeding it new blocks
/// and mempool transactions. Returns the actor together with the shared
/// best-known block count.
pub async fn start_chain<C: ChainRpc>(
    config: &ChainConfig,
    client: Arc<C>,
    supervisor: ActorCell,
) -> crate::Result<(ActorRef<ChainMessage>, Arc<AtomicU64>)> {
    let block_count = Arc::new(AtomicU64::new(0));
    let (actor, _handle) = Actor::spawn_linked(
        Some("chain actor".to_string()),
        ChainActor::new(),
        (
            Arc::clone(&client),
            Arc::clone(&block_count),
            actor::BLOCK_TICK_DEBOUNCE,
        ),
        supervisor,
    )
    .await?;

    let poll_interval = Duration::from_millis(
        config
            .poll_interval_ms
            .unwrap_or(config::DEFAULT_POLL_INTERVAL_MS),
    );
    let token = new_tokio_cancellation_token();
    let chain = actor.clone();
    new_tokio_task_tracker().spawn(async move {
        poll_backend(client, chain, poll_interval, token).await;
    });

    Ok((actor, block_count))
}

/// Poll-based stand-in for a push backend: announces new blocks and new
/// mempool transactions to the watcher.
async fn poll_backend<C: ChainRpc>(
    client: Arc<C>,
    chain: ActorRef<ChainMessage>,
    poll_interval: Duration,
    token: CancellationToken,
) {
    let mut known_tip = 0u64;
    let mut seen: HashSet<Txid> = HashSet::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(poll_interval) => {}
        }
        match client.get_block_count().await {
            Ok(tip) => {
                if tip != known_tip {
                    known_tip = tip;
                    let _ = chain.send_message(ChainMessage::NewBlock);
                }
            }
            Err(err) => {
                warn!("Failed to poll block count: {}", err);
                continue;
            }
        }
        match client.get_raw_mempool().await {
            Ok(txids) => {
                let txids: HashSet<Txid> = txids.into_iter().collect();
                for txid in txids.difference(&seen) {
                    match client.get_raw_transaction(*txid).await {
                        Ok(Some(tx)) => {
                            let _ = chain.send_message(ChainMessage::NewTransaction(tx));
                        }
                        Ok(None) => {}
                        Err(err) => warn!("Failed to fetch mempool transaction: {}", err),
                    }
                }
                seen = txids;
            }
            Err(err) => warn!("Failed to poll mempool: {}", err),
        }
    }
}
