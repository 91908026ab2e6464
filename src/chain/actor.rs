use std::collections::{BTreeMap, HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitcoin::{absolute, relative, OutPoint, Transaction, Txid};
use ractor::{
    async_trait as rasync_trait,
    concurrency::{sleep, Duration, JoinHandle},
    Actor, ActorProcessingErr, ActorRef, MessagingErr, RpcReplyPort,
};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::router::types::ChannelAnnouncement;

use super::client::{ChainRpc, TxBlockMeta, TxWithMeta};
use super::error::ChainRpcError;
use super::watch::{Watch, WatchConsumer, WatchEvent, WatchTag};

/// Delay between a new-block notification and the re-evaluation tick,
/// coalescing block storms (regtest, reorg catch-up) into one tick.
pub(crate) const BLOCK_TICK_DEBOUNCE: Duration = Duration::from_secs(2);

/// Backoff before the single retry after a missing-inputs broadcast error.
const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Result of looking up a channel's funding transaction on chain.
#[derive(Debug, Clone)]
pub struct ChannelValidation {
    pub funding_tx: Transaction,
    /// Whether the funding output is currently unspent.
    pub unspent: bool,
}

#[derive(Debug)]
pub struct ConfirmedWatch {
    watch_id: u64,
    block_height: u64,
    tx_index: u32,
    tx: Transaction,
}

pub enum ChainMessage {
    /// Register a watch for a consumer. Duplicate watches are ignored.
    RegisterWatch(Watch, Arc<dyn WatchConsumer>),
    /// Broadcast a signed transaction once its CSV parents are deep enough
    /// and the current block has reached its nLockTime.
    PublishAsap(Transaction),
    /// Look up a channel's funding transaction and whether it is unspent.
    ValidateChannel(
        ChannelAnnouncement,
        RpcReplyPort<Result<Option<ChannelValidation>, ChainRpcError>>,
    ),
    /// A transaction plus best-effort block metadata.
    GetTxWithMeta(
        Txid,
        RpcReplyPort<Result<Option<TxWithMeta>, ChainRpcError>>,
    ),
    /// Backend feed: a new block was announced.
    NewBlock,
    /// Backend feed: a new transaction entered the mempool (or was found
    /// by the registration-time spend scan).
    NewTransaction(Transaction),
    /// Debounced re-evaluation trigger.
    Tick,
    /// Continuation of `Tick` after the RPC round-trips.
    TickCompleted {
        block_count: u64,
        confirmations: Vec<ConfirmedWatch>,
    },
    /// Watch events the watcher itself consumes (CSV parent tracking).
    WatchNotification(WatchEvent),
}

impl From<WatchEvent> for ChainMessage {
    fn from(event: WatchEvent) -> Self {
        ChainMessage::WatchNotification(event)
    }
}

struct RegisteredWatch {
    watch: Watch,
    consumer: Arc<dyn WatchConsumer>,
}

pub struct ChainActorState<C> {
    client: Arc<C>,
    /// Best-known block count, shared read-only with the other actors.
    block_count: Arc<AtomicU64>,
    watches: HashMap<u64, RegisteredWatch>,
    next_watch_id: u64,
    /// Secondary index so a new transaction is checked in O(|inputs|).
    utxo_index: HashMap<OutPoint, HashSet<u64>>,
    /// Transactions waiting for CSV parents, with the number of parents
    /// still missing their depth.
    csv_pending: HashMap<Txid, (Transaction, usize)>,
    /// Transactions waiting for an absolute locktime, keyed by height.
    cltv_queue: BTreeMap<u64, Vec<Transaction>>,
    /// Single-writer broadcast queue; keeps publishes in submission order.
    publisher: mpsc::UnboundedSender<Transaction>,
    tick_timer: Option<JoinHandle<Result<(), MessagingErr<ChainMessage>>>>,
    tick_debounce: Duration,
}

impl<C: ChainRpc> ChainActorState<C> {
    fn register_watch(
        &mut self,
        myself: &ActorRef<ChainMessage>,
        watch: Watch,
        consumer: Arc<dyn WatchConsumer>,
    ) {
        if self.watches.values().any(|w| w.watch == watch) {
            debug!("Ignoring duplicate watch registration: {:?}", watch);
            return;
        }
        let id = self.next_watch_id;
        self.next_watch_id += 1;
        let outpoint = watch.outpoint();
        if let Some(outpoint) = outpoint {
            self.utxo_index.entry(outpoint).or_default().insert(id);
        }
        trace!("Registered watch #{}: {:?}", id, watch);
        self.watches.insert(id, RegisteredWatch { watch, consumer });

        // The output may already be spent; look for the spender in the
        // mempool first and on chain after that, and replay it through
        // the normal new-transaction path.
        if let Some(outpoint) = outpoint {
            let client = Arc::clone(&self.client);
            let myself = myself.clone();
            tokio::spawn(async move {
                match client.is_output_spendable(outpoint, true).await {
                    Ok(true) => {}
                    Ok(false) => match client.find_spending_tx(outpoint).await {
                        Ok(Some(tx)) => {
                            let _ = myself.send_message(ChainMessage::NewTransaction(tx));
                        }
                        Ok(None) => {
                            warn!(
                                "Output {} is unspendable but no spending transaction was found",
                                outpoint
                            );
                        }
                        Err(err) => {
                            warn!("Failed to look for the spender of {}: {}", outpoint, err);
                        }
                    },
                    Err(err) => {
                        warn!("Failed to check spendability of {}: {}", outpoint, err);
                    }
                }
            });
        }
    }

    fn remove_watch(&mut self, id: u64) {
        if let Some(removed) = self.watches.remove(&id) {
            if let Some(outpoint) = removed.watch.outpoint() {
                if let Some(ids) = self.utxo_index.get_mut(&outpoint) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.utxo_index.remove(&outpoint);
                    }
                }
            }
        }
    }

    fn process_transaction(&mut self, tx: &Transaction) {
        for input in &tx.input {
            let Some(ids) = self.utxo_index.get(&input.previous_output) else {
                continue;
            };
            let ids = ids.iter().copied().collect::<Vec<_>>();
            for id in ids {
                let Some(registered) = self.watches.get(&id) else {
                    continue;
                };
                match &registered.watch {
                    Watch::SpentBasic { tag, .. } => {
                        registered
                            .consumer
                            .deliver(WatchEvent::SpentBasic { tag: tag.clone() });
                        self.remove_watch(id);
                    }
                    Watch::Spent { tag, .. } => {
                        // Permanent: every candidate spend is reported.
                        registered.consumer.deliver(WatchEvent::Spent {
                            tag: tag.clone(),
                            spending_tx: tx.clone(),
                        });
                    }
                    Watch::Confirmed { .. } => {}
                }
            }
        }
    }

    /// Schedule a transaction for broadcast, honoring relative locks
    /// first, then the absolute locktime. `csv_checked` marks re-entries
    /// whose relative locks are already accounted for by block depth.
    fn publish_asap(&mut self, myself: &ActorRef<ChainMessage>, tx: Transaction, csv_checked: bool) {
        let txid = tx.compute_txid();
        if !csv_checked {
            let parents = csv_parents(&tx);
            if !parents.is_empty() {
                debug!(
                    "Delaying publish of {} until {} CSV parents are deep enough",
                    txid,
                    parents.len()
                );
                // One entry per distinct (parent, delay) pair, matching
                // the watches registered below: the pending counter only
                // reaches zero if every registered watch fires.
                self.csv_pending.insert(txid, (tx.clone(), parents.len()));
                for (parent_txid, csv_delay) in parents {
                    let watch = Watch::Confirmed {
                        tx_id: parent_txid,
                        min_depth: csv_delay as u64,
                        tag: WatchTag::ParentConfirmed(Box::new(tx.clone())),
                    };
                    self.register_watch(myself, watch, Arc::new(myself.clone()));
                }
                return;
            }
        }
        let cltv_timeout = cltv_timeout(&tx);
        let current_block = self.block_count.load(Ordering::Acquire);
        if cltv_timeout > current_block {
            debug!(
                "Delaying publish of {} until block {} (currently at {})",
                txid, cltv_timeout, current_block
            );
            self.cltv_queue.entry(cltv_timeout).or_default().push(tx);
        } else {
            self.send_to_publisher(tx);
        }
    }

    fn send_to_publisher(&self, tx: Transaction) {
        if self.publisher.send(tx).is_err() {
            error!("Transaction publisher task is gone");
        }
    }

    fn parent_confirmed(&mut self, myself: &ActorRef<ChainMessage>, child: &Transaction) {
        let txid = child.compute_txid();
        let Some((_, remaining)) = self.csv_pending.get_mut(&txid) else {
            return;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            let (tx, _) = self.csv_pending.remove(&txid).expect("entry just updated");
            self.publish_asap(myself, tx, true);
        }
    }

    fn reap_dead_consumers(&mut self) {
        let dead = self
            .watches
            .iter()
            .filter(|(_, registered)| !registered.consumer.is_alive())
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in dead {
            trace!("Reaping watch #{} whose consumer is gone", id);
            self.remove_watch(id);
        }
    }

    fn drain_cltv_queue(&mut self, block_count: u64) {
        let ready = self
            .cltv_queue
            .range(..=block_count)
            .map(|(height, _)| *height)
            .collect::<Vec<_>>();
        for height in ready {
            for tx in self.cltv_queue.remove(&height).unwrap_or_default() {
                debug!("Block {} reached, publishing transaction", height);
                self.send_to_publisher(tx);
            }
        }
    }
}

pub struct ChainActor<C> {
    _phantom: PhantomData<C>,
}

impl<C> ChainActor<C> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<C> Default for ChainActor<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[rasync_trait]
impl<C: ChainRpc> Actor for ChainActor<C> {
    type Msg = ChainMessage;
    type State = ChainActorState<C>;
    type Arguments = (Arc<C>, Arc<AtomicU64>, Duration);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        (client, block_count, tick_debounce): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (publisher, publish_queue) = mpsc::unbounded_channel();
        tokio::spawn(run_publisher(Arc::clone(&client), publish_queue));
        Ok(ChainActorState {
            client,
            block_count,
            watches: Default::default(),
            next_watch_id: 0,
            utxo_index: Default::default(),
            csv_pending: Default::default(),
            cltv_queue: Default::default(),
            publisher,
            tick_timer: None,
            tick_debounce,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ChainMessage::RegisterWatch(watch, consumer) => {
                state.register_watch(&myself, watch, consumer);
            }
            ChainMessage::PublishAsap(tx) => {
                state.publish_asap(&myself, tx, false);
            }
            ChainMessage::ValidateChannel(announcement, reply) => {
                let client = Arc::clone(&state.client);
                tokio::spawn(async move {
                    let result = validate_channel(client, &announcement).await;
                    if !reply.is_closed() {
                        let _ = reply.send(result);
                    }
                });
            }
            ChainMessage::GetTxWithMeta(txid, reply) => {
                let client = Arc::clone(&state.client);
                tokio::spawn(async move {
                    let result = get_tx_with_meta(client, txid).await;
                    if !reply.is_closed() {
                        let _ = reply.send(result);
                    }
                });
            }
            ChainMessage::NewBlock => {
                // Restart the debounce window on every block.
                if let Some(timer) = state.tick_timer.take() {
                    timer.abort();
                }
                state.tick_timer =
                    Some(myself.send_after(state.tick_debounce, || ChainMessage::Tick));
            }
            ChainMessage::NewTransaction(tx) => {
                state.process_transaction(&tx);
            }
            ChainMessage::Tick => {
                state.tick_timer = None;
                let snapshot = state
                    .watches
                    .iter()
                    .filter_map(|(id, registered)| match &registered.watch {
                        Watch::Confirmed {
                            tx_id, min_depth, ..
                        } => Some((*id, *tx_id, *min_depth)),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                let client = Arc::clone(&state.client);
                let myself = myself.clone();
                // The RPC round-trips happen off the mailbox; the result
                // comes back as a TickCompleted message and is applied to
                // whatever the state looks like then.
                tokio::spawn(async move {
                    let block_count = match client.get_block_count().await {
                        Ok(count) => count,
                        Err(err) => {
                            error!("Failed to get block count, retrying on next tick: {}", err);
                            return;
                        }
                    };
                    let mut confirmations = Vec::new();
                    for (watch_id, txid, min_depth) in snapshot {
                        match evaluate_confirmed_watch(&client, txid, min_depth).await {
                            Ok(Some((meta, tx))) => confirmations.push(ConfirmedWatch {
                                watch_id,
                                block_height: meta.block_height,
                                tx_index: meta.tx_index,
                                tx,
                            }),
                            Ok(None) => {}
                            Err(err) => {
                                warn!(
                                    "Failed to evaluate confirmations of {}, retrying on next tick: {}",
                                    txid, err
                                );
                            }
                        }
                    }
                    let _ = myself.send_message(ChainMessage::TickCompleted {
                        block_count,
                        confirmations,
                    });
                });
            }
            ChainMessage::TickCompleted {
                block_count,
                confirmations,
            } => {
                state.block_count.store(block_count, Ordering::Release);
                state.reap_dead_consumers();
                for confirmed in confirmations {
                    // The watch may have been resolved or reaped while the
                    // RPCs were in flight.
                    let Some(registered) = state.watches.get(&confirmed.watch_id) else {
                        continue;
                    };
                    registered.consumer.deliver(WatchEvent::Confirmed {
                        tag: registered.watch.tag().clone(),
                        block_height: confirmed.block_height,
                        tx_index: confirmed.tx_index,
                        tx: confirmed.tx,
                    });
                    state.remove_watch(confirmed.watch_id);
                }
                state.drain_cltv_queue(block_count);
            }
            ChainMessage::WatchNotification(event) => match event {
                WatchEvent::Confirmed {
                    tag: WatchTag::ParentConfirmed(child),
                    ..
                } => {
                    state.parent_confirmed(&myself, &child);
                }
                other => {
                    trace!("Ignoring watch event not meant for the watcher: {:?}", other);
                }
            },
        }
        Ok(())
    }
}

/// The parent transactions whose depth gates this transaction, with the
/// required depth. Several inputs may spend outputs of the same parent
/// under the same delay (a sweep of one commitment transaction); depth
/// is a property of the parent, so such inputs collapse into one entry
/// and one confirmation watch.
fn csv_parents(tx: &Transaction) -> Vec<(Txid, u16)> {
    let mut parents = tx
        .input
        .iter()
        .filter_map(|input| match input.sequence.to_relative_lock_time() {
            Some(relative::LockTime::Blocks(height)) => {
                Some((input.previous_output.txid, height.value()))
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    parents.sort_unstable();
    parents.dedup();
    parents
}

/// The block height an absolute locktime keeps the transaction out of the
/// mempool until, zero when there is none.
fn cltv_timeout(tx: &Transaction) -> u64 {
    if !tx.is_lock_time_enabled() {
        return 0;
    }
    match tx.lock_time {
        absolute::LockTime::Blocks(height) => height.to_consensus_u32() as u64,
        absolute::LockTime::Seconds(_) => 0,
    }
}

async fn validate_channel<C: ChainRpc>(
    client: Arc<C>,
    announcement: &ChannelAnnouncement,
) -> Result<Option<ChannelValidation>, ChainRpcError> {
    let short_channel_id = announcement.short_channel_id;
    let Some(funding_tx) = client
        .get_tx_for_location(
            short_channel_id.block_height() as u64,
            short_channel_id.tx_index(),
        )
        .await?
    else {
        return Ok(None);
    };
    let outpoint = OutPoint::new(
        funding_tx.compute_txid(),
        short_channel_id.output_index() as u32,
    );
    let unspent = client.is_output_spendable(outpoint, true).await?;
    Ok(Some(ChannelValidation { funding_tx, unspent }))
}

async fn get_tx_with_meta<C: ChainRpc>(
    client: Arc<C>,
    txid: Txid,
) -> Result<Option<TxWithMeta>, ChainRpcError> {
    let Some(tx) = client.get_raw_transaction(txid).await? else {
        return Ok(None);
    };
    let meta = client.get_tx_block_meta(txid).await?;
    Ok(Some(TxWithMeta { tx, meta }))
}

async fn evaluate_confirmed_watch<C: ChainRpc>(
    client: &Arc<C>,
    txid: Txid,
    min_depth: u64,
) -> Result<Option<(TxBlockMeta, Transaction)>, ChainRpcError> {
    match client.get_tx_confirmations(txid).await? {
        Some(confirmations) if confirmations >= min_depth => {}
        _ => return Ok(None),
    }
    let Some(meta) = client.get_tx_block_meta(txid).await? else {
        return Ok(None);
    };
    let Some(tx) = client.get_raw_transaction(txid).await? else {
        return Ok(None);
    };
    Ok(Some((meta, tx)))
}

/// Broadcasts transactions strictly in submission order. A missing-inputs
/// error is a mempool race with a parent publish and gets one retry.
async fn run_publisher<C: ChainRpc>(
    client: Arc<C>,
    mut publish_queue: mpsc::UnboundedReceiver<Transaction>,
) {
    while let Some(tx) = publish_queue.recv().await {
        let txid = tx.compute_txid();
        match client.send_raw_transaction(&tx).await {
            Ok(_) => debug!("Broadcast transaction {}", txid),
            Err(err) if err.is_missing_inputs() => {
                warn!("Missing inputs while broadcasting {}, retrying once", txid);
                sleep(PUBLISH_RETRY_DELAY).await;
                match client.send_raw_transaction(&tx).await {
                    Ok(_) => debug!("Broadcast transaction {} on retry", txid),
                    Err(err) => error!("Failed to broadcast {} after retry: {}", txid, err),
                }
            }
            Err(err) => error!("Failed to broadcast {}: {}", txid, err),
        }
    }
}
