pub mod actor;
pub mod config;
pub mod graph;
pub mod types;

#[cfg(test)]
pub mod tests;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use ractor::concurrency::Duration;
use ractor::{Actor, ActorCell, ActorRef, OutputPort};

pub use actor::{RouteRequest, RouterActor, RouterMessage, RouterOutbound, RouterTickIntervals};
pub use config::RouterConfig;
pub use graph::{Hop, MemoryStore, NetworkGraph, RouteError, RouterStore};

use crate::chain::ChainMessage;
use crate::events::EventBus;

/// Spawn the gossip router. Peer-facing output (rebroadcast batches and
/// error replies) flows through the returned port.
pub async fn start_router<S>(
    config: &RouterConfig,
    store: S,
    chain: ActorRef<ChainMessage>,
    block_count: Arc<AtomicU64>,
    events: EventBus,
    supervisor: ActorCell,
) -> crate::Result<(ActorRef<RouterMessage>, Arc<OutputPort<RouterOutbound>>)>
where
    S: RouterStore + Send + Sync + 'static,
{
    let mut intervals = RouterTickIntervals::default();
    if let Some(secs) = config.broadcast_interval_secs {
        intervals.broadcast = Duration::from_secs(secs);
    }
    if let Some(secs) = config.prune_interval_secs {
        intervals.prune = Duration::from_secs(secs);
    }
    let outbound = Arc::new(OutputPort::default());
    let (actor, _handle) = Actor::spawn_linked(
        Some("router actor".to_string()),
        RouterActor::new(),
        (
            store,
            chain,
            block_count,
            events,
            Arc::clone(&outbound),
            intervals,
        ),
        supervisor,
    )
    .await?;
    Ok((actor, outbound))
}
