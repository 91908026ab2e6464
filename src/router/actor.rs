use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_2};
use bitcoin::blockdata::script::Builder;
use bitcoin::ScriptBuf;
use ractor::{
    async_trait as rasync_trait, call_t, concurrency::Duration, Actor, ActorProcessingErr,
    ActorRef, OutputPort, RpcReplyPort,
};
use tracing::{debug, error, info, trace, warn};

use crate::chain::{ChainMessage, ChannelValidation, Watch, WatchEvent, WatchTag};
use crate::events::{EventBus, NodeEvent};
use crate::now_timestamp_as_secs_u64;

use super::graph::{Hop, NetworkGraph, PruneResult, RouteError, RouterStore};
use super::types::{
    check_chain_hash, ChannelAnnouncement, ChannelDesc, ChannelUpdate, GossipMessage,
    GossipMessageWithPeer, Hash256, PeerId, Pubkey, ShortChannelId,
};

/// Upper bound on channel announcements submitted to the chain watcher in
/// one validation batch.
pub(crate) const MAX_PARALLEL_VALIDATIONS: usize = 50;

/// Gossip with a timestamp further in the future than this is dropped.
const MAX_GOSSIP_TIMESTAMP_DRIFT_SECS: u64 = 60;

pub(crate) const DEFAULT_CHAIN_ACTOR_TIMEOUT_MS: u64 = 30_000;

const DEFAULT_VALIDATE_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24);

/// Timer periods, overridable in tests.
#[derive(Debug, Clone, Copy)]
pub struct RouterTickIntervals {
    pub validate: Duration,
    pub broadcast: Duration,
    pub prune: Duration,
}

impl Default for RouterTickIntervals {
    fn default() -> Self {
        Self {
            validate: DEFAULT_VALIDATE_INTERVAL,
            broadcast: DEFAULT_BROADCAST_INTERVAL,
            prune: DEFAULT_PRUNE_INTERVAL,
        }
    }
}

/// Parameters of a route computation.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub start: Pubkey,
    pub end: Pubkey,
    pub ignore_nodes: HashSet<Pubkey>,
    pub ignore_channels: HashSet<ShortChannelId>,
}

pub enum RouterMessage {
    /// Gossip received from a peer, in per-peer receipt order.
    GossipReceived(GossipMessageWithPeer),
    /// Compute a route between two public keys.
    FindRoute(RouteRequest, RpcReplyPort<Result<Vec<Hop>, RouteError>>),
    /// Make a directed edge unavailable for routing for a while.
    ExcludeChannel(ChannelDesc, Duration),
    LiftChannelExclusion(ChannelDesc),
    /// Lifecycle event from one of our own channels.
    LocalChannelChanged {
        channel_id: Hash256,
        update: Option<(ChannelDesc, ChannelUpdate)>,
    },
    /// Continuation of a validation batch dispatched to the chain watcher.
    ValidationResult(Vec<(PeerId, ChannelAnnouncement, Option<ChannelValidation>)>),
    /// Watch events (spent funding outputs).
    WatchNotification(WatchEvent),
    TickValidate,
    TickBroadcast,
    TickPruneStaleChannels,
}

impl From<WatchEvent> for RouterMessage {
    fn from(event: WatchEvent) -> Self {
        RouterMessage::WatchNotification(event)
    }
}

/// Peer-facing output; the transport is an external collaborator
/// subscribed to this port.
#[derive(Debug, Clone)]
pub enum RouterOutbound {
    /// A drained rebroadcast batch, in insertion order.
    GossipBatch(Vec<GossipMessage>),
    /// Protocol-error reply to the origin of an invalid message.
    PeerError { peer_id: PeerId, error: String },
}

/// The router is either idle or waiting for one validation batch; it
/// never runs two batches at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouterPhase {
    Normal,
    WaitingForValidation,
}

pub struct RouterActorState<S> {
    graph: NetworkGraph<S>,
    phase: RouterPhase,
    /// Messages waiting on a channel admission: unvalidated channel
    /// announcements plus node announcements / updates referencing them.
    stash: Vec<GossipMessageWithPeer>,
    /// Channel announcements currently out for validation.
    awaiting: HashMap<ShortChannelId, ChannelAnnouncement>,
    rebroadcast_queue: Vec<GossipMessage>,
    /// First peer each queued message came in from; reset on every
    /// broadcast tick.
    origins: HashMap<GossipMessage, PeerId>,
    chain: ActorRef<ChainMessage>,
    block_count: Arc<AtomicU64>,
    events: EventBus,
    outbound: Arc<OutputPort<RouterOutbound>>,
}

impl<S: RouterStore> RouterActorState<S> {
    fn reply_error(&self, peer_id: PeerId, error: String) {
        warn!("Rejecting gossip from {}: {}", peer_id, error);
        self.outbound
            .send(RouterOutbound::PeerError { peer_id, error });
    }

    fn enqueue_rebroadcast(&mut self, message: GossipMessage, peer_id: PeerId) {
        self.origins.insert(message.clone(), peer_id);
        self.rebroadcast_queue.push(message);
    }

    fn stashed_announcement(&self, short_channel_id: ShortChannelId) -> bool {
        self.stash.iter().any(|entry| {
            matches!(
                &entry.message,
                GossipMessage::ChannelAnnouncement(announcement)
                    if announcement.short_channel_id == short_channel_id
            )
        })
    }

    /// An announcement for the channel exists but has not been admitted
    /// yet (still stashed or out for validation).
    fn announcement_pending(&self, short_channel_id: ShortChannelId) -> bool {
        self.awaiting.contains_key(&short_channel_id)
            || self.stashed_announcement(short_channel_id)
    }

    fn pending_announcement_references_node(&self, node_id: &Pubkey) -> bool {
        self.awaiting
            .values()
            .any(|announcement| NetworkGraph::<S>::announcement_references_node(announcement, node_id))
            || self.stash.iter().any(|entry| {
                matches!(
                    &entry.message,
                    GossipMessage::ChannelAnnouncement(announcement)
                        if NetworkGraph::<S>::announcement_references_node(announcement, node_id)
                )
            })
    }

    fn handle_channel_announcement(&mut self, peer_id: PeerId, announcement: ChannelAnnouncement) {
        let short_channel_id = announcement.short_channel_id;
        if let Err(err) = check_chain_hash(&announcement.chain_hash) {
            debug!("Dropping channel announcement {}: {}", short_channel_id, err);
            return;
        }
        if self.graph.has_channel(short_channel_id) || self.announcement_pending(short_channel_id)
        {
            trace!(
                "Ignoring duplicate channel announcement {}",
                short_channel_id
            );
            return;
        }
        if announcement.node_id_1 >= announcement.node_id_2 {
            debug!(
                "Dropping channel announcement {} with unordered node ids",
                short_channel_id
            );
            return;
        }
        if let Err(err) = announcement.verify_signatures() {
            self.reply_error(peer_id, err.to_string());
            return;
        }
        trace!(
            "Stashing channel announcement {} from {}",
            short_channel_id,
            peer_id
        );
        self.origins.insert(
            GossipMessage::ChannelAnnouncement(announcement.clone()),
            peer_id,
        );
        self.stash.push(GossipMessageWithPeer {
            peer_id,
            message: GossipMessage::ChannelAnnouncement(announcement),
        });
    }

    fn handle_node_announcement(
        &mut self,
        peer_id: PeerId,
        announcement: super::types::NodeAnnouncement,
    ) {
        let node_id = announcement.node_id;
        if let Some(existing) = self.graph.get_node(&node_id) {
            if existing.timestamp >= announcement.timestamp {
                trace!("Ignoring outdated node announcement for {}", node_id);
                return;
            }
        }
        if announcement.timestamp
            > now_timestamp_as_secs_u64() + MAX_GOSSIP_TIMESTAMP_DRIFT_SECS
        {
            debug!(
                "Dropping node announcement for {} with a future timestamp",
                node_id
            );
            return;
        }
        if !announcement.verify() {
            self.reply_error(
                peer_id,
                format!("Node announcement for {} has an invalid signature", node_id),
            );
            return;
        }
        if self.graph.get_node(&node_id).is_some() || self.graph.node_has_channels(&node_id) {
            self.graph.add_node(announcement.clone());
            self.enqueue_rebroadcast(GossipMessage::NodeAnnouncement(announcement), peer_id);
        } else if self.pending_announcement_references_node(&node_id) {
            trace!("Stashing node announcement for {} pending its channel", node_id);
            self.stash.push(GossipMessageWithPeer {
                peer_id,
                message: GossipMessage::NodeAnnouncement(announcement),
            });
        } else {
            debug!(
                "Dropping node announcement for {} with no related channel",
                node_id
            );
        }
    }

    fn handle_channel_update(&mut self, peer_id: PeerId, update: ChannelUpdate) {
        let short_channel_id = update.short_channel_id;
        if let Some(announcement) = self.graph.get_channel(short_channel_id) {
            let desc = update.channel_desc(announcement);
            if let Some(existing) = self.graph.get_update(&desc) {
                if existing.timestamp >= update.timestamp {
                    trace!("Ignoring outdated channel update for {}", short_channel_id);
                    return;
                }
            }
            if !update.verify(&desc.from_node) {
                self.reply_error(
                    peer_id,
                    format!(
                        "Channel update for {} has an invalid signature",
                        short_channel_id
                    ),
                );
                return;
            }
            self.graph.apply_update(desc, update.clone());
            self.enqueue_rebroadcast(GossipMessage::ChannelUpdate(update), peer_id);
        } else if self.announcement_pending(short_channel_id) {
            trace!(
                "Stashing channel update for pending channel {}",
                short_channel_id
            );
            self.stash.push(GossipMessageWithPeer {
                peer_id,
                message: GossipMessage::ChannelUpdate(update),
            });
        } else {
            debug!(
                "Dropping channel update for unknown channel {}",
                short_channel_id
            );
        }
    }

    /// Move up to MAX_PARALLEL_VALIDATIONS stashed announcements into the
    /// awaiting set and dispatch the chain lookups off the mailbox.
    fn start_validation_batch(&mut self, myself: &ActorRef<RouterMessage>) {
        let mut batch = Vec::new();
        let mut rest = Vec::new();
        for entry in self.stash.drain(..) {
            match entry.message {
                GossipMessage::ChannelAnnouncement(announcement)
                    if batch.len() < MAX_PARALLEL_VALIDATIONS =>
                {
                    batch.push((entry.peer_id, announcement));
                }
                message => rest.push(GossipMessageWithPeer {
                    peer_id: entry.peer_id,
                    message,
                }),
            }
        }
        self.stash = rest;
        if batch.is_empty() {
            return;
        }
        debug!("Dispatching validation batch of {} announcements", batch.len());
        for (_, announcement) in &batch {
            self.awaiting
                .insert(announcement.short_channel_id, announcement.clone());
        }
        self.phase = RouterPhase::WaitingForValidation;
        let chain = self.chain.clone();
        let myself = myself.clone();
        tokio::spawn(async move {
            let mut results = Vec::with_capacity(batch.len());
            for (peer_id, announcement) in batch {
                let validation = match call_t!(
                    chain,
                    ChainMessage::ValidateChannel,
                    DEFAULT_CHAIN_ACTOR_TIMEOUT_MS,
                    announcement.clone()
                ) {
                    Ok(Ok(Some(validation))) => Some(validation),
                    Ok(Ok(None)) => {
                        debug!(
                            "Funding transaction of {} not found on chain",
                            announcement.short_channel_id
                        );
                        None
                    }
                    Ok(Err(err)) => {
                        warn!(
                            "Chain lookup for {} failed: {}",
                            announcement.short_channel_id, err
                        );
                        None
                    }
                    Err(err) => {
                        warn!(
                            "Chain actor call for {} failed: {}",
                            announcement.short_channel_id, err
                        );
                        None
                    }
                };
                results.push((peer_id, announcement, validation));
            }
            let _ = myself.send_message(RouterMessage::ValidationResult(results));
        });
    }

    fn apply_validation_results(
        &mut self,
        myself: &ActorRef<RouterMessage>,
        results: Vec<(PeerId, ChannelAnnouncement, Option<ChannelValidation>)>,
    ) {
        for (_peer_id, announcement, validation) in results {
            let short_channel_id = announcement.short_channel_id;
            self.awaiting.remove(&short_channel_id);
            // A failed lookup only drops the announcement from this batch;
            // a later rebroadcast may succeed.
            let Some(validation) = validation else {
                continue;
            };
            let output_index = short_channel_id.output_index() as usize;
            let expected_script =
                funding_script(&announcement.bitcoin_key_1, &announcement.bitcoin_key_2);
            match validation.funding_tx.output.get(output_index) {
                Some(output) if output.script_pubkey == expected_script => {}
                _ => {
                    warn!(
                        "Discarding channel announcement {}: funding output script mismatch",
                        short_channel_id
                    );
                    continue;
                }
            }
            if !validation.unspent {
                debug!(
                    "Dropping channel announcement {}: funding output already spent",
                    short_channel_id
                );
                continue;
            }
            if !self.graph.add_channel(announcement.clone()) {
                continue;
            }
            info!("Admitted channel {} into the graph", short_channel_id);
            let watch = Watch::SpentBasic {
                tx_id: validation.funding_tx.compute_txid(),
                output_index: output_index as u32,
                tag: WatchTag::ExternalChannelSpent(short_channel_id),
            };
            if self
                .chain
                .send_message(ChainMessage::RegisterWatch(watch, Arc::new(myself.clone())))
                .is_err()
            {
                error!("Chain actor is gone, cannot watch {}", short_channel_id);
            }
            self.events
                .publish(NodeEvent::ChannelAnnounced(short_channel_id));
            let origin = self
                .origins
                .get(&GossipMessage::ChannelAnnouncement(announcement.clone()))
                .copied();
            if let Some(peer_id) = origin {
                self.enqueue_rebroadcast(
                    GossipMessage::ChannelAnnouncement(announcement.clone()),
                    peer_id,
                );
            } else {
                self.rebroadcast_queue
                    .push(GossipMessage::ChannelAnnouncement(announcement.clone()));
            }
            // Re-inject whatever was waiting for this admission.
            let mut rest = Vec::new();
            let mut pending = Vec::new();
            for entry in self.stash.drain(..) {
                let wakes = match &entry.message {
                    GossipMessage::ChannelUpdate(update) => {
                        update.short_channel_id == short_channel_id
                    }
                    GossipMessage::NodeAnnouncement(node_announcement) => {
                        NetworkGraph::<S>::announcement_references_node(
                            &announcement,
                            &node_announcement.node_id,
                        )
                    }
                    GossipMessage::ChannelAnnouncement(_) => false,
                };
                if wakes {
                    pending.push(entry);
                } else {
                    rest.push(entry);
                }
            }
            self.stash = rest;
            for entry in pending {
                let _ = myself.send_message(RouterMessage::GossipReceived(entry));
            }
        }
        self.phase = RouterPhase::Normal;
    }

    fn remove_spent_channel(&mut self, short_channel_id: ShortChannelId) {
        match self.graph.remove_channel(short_channel_id) {
            Some(removed) => {
                info!(
                    "Removed channel {} whose funding output was spent",
                    short_channel_id
                );
                self.publish_prune_events(removed);
            }
            None => trace!(
                "Spend notification for unknown channel {}",
                short_channel_id
            ),
        }
    }

    fn publish_prune_events(&self, removed: PruneResult) {
        for short_channel_id in removed.channels {
            self.events.publish(NodeEvent::ChannelLost(short_channel_id));
        }
        for node_id in removed.nodes {
            self.events.publish(NodeEvent::NodeLost(node_id));
        }
    }
}

pub struct RouterActor<S> {
    _phantom: PhantomData<S>,
}

impl<S> RouterActor<S> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<S> Default for RouterActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[rasync_trait]
impl<S> Actor for RouterActor<S>
where
    S: RouterStore + Send + Sync + 'static,
{
    type Msg = RouterMessage;
    type State = RouterActorState<S>;
    type Arguments = (
        S,
        ActorRef<ChainMessage>,
        Arc<AtomicU64>,
        EventBus,
        Arc<OutputPort<RouterOutbound>>,
        RouterTickIntervals,
    );

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (store, chain, block_count, events, outbound, intervals): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let graph = NetworkGraph::new(store);
        // Channels reloaded from the store need their spend watches back.
        // The funding txid is not persisted, so look it up again; the
        // registration-time spent check catches channels that closed
        // while we were down.
        for announcement in graph.channels().cloned() {
            let chain = chain.clone();
            let myself = myself.clone();
            tokio::spawn(async move {
                let short_channel_id = announcement.short_channel_id;
                match call_t!(
                    chain,
                    ChainMessage::ValidateChannel,
                    DEFAULT_CHAIN_ACTOR_TIMEOUT_MS,
                    announcement
                ) {
                    Ok(Ok(Some(validation))) => {
                        let watch = Watch::SpentBasic {
                            tx_id: validation.funding_tx.compute_txid(),
                            output_index: short_channel_id.output_index() as u32,
                            tag: WatchTag::ExternalChannelSpent(short_channel_id),
                        };
                        let _ = chain
                            .send_message(ChainMessage::RegisterWatch(watch, Arc::new(myself)));
                    }
                    _ => warn!(
                        "Could not look up the funding transaction of reloaded channel {}",
                        short_channel_id
                    ),
                }
            });
        }
        let _ = myself.send_interval(intervals.validate, || RouterMessage::TickValidate);
        let _ = myself.send_interval(intervals.broadcast, || RouterMessage::TickBroadcast);
        let _ = myself.send_interval(intervals.prune, || RouterMessage::TickPruneStaleChannels);
        Ok(RouterActorState {
            graph,
            phase: RouterPhase::Normal,
            stash: Default::default(),
            awaiting: Default::default(),
            rebroadcast_queue: Default::default(),
            origins: Default::default(),
            chain,
            block_count,
            events,
            outbound,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RouterMessage::GossipReceived(GossipMessageWithPeer { peer_id, message }) => {
                match message {
                    GossipMessage::ChannelAnnouncement(announcement) => {
                        state.handle_channel_announcement(peer_id, announcement);
                    }
                    GossipMessage::NodeAnnouncement(announcement) => {
                        state.handle_node_announcement(peer_id, announcement);
                    }
                    GossipMessage::ChannelUpdate(update) => {
                        state.handle_channel_update(peer_id, update);
                    }
                }
            }
            RouterMessage::FindRoute(request, reply) => {
                let result = state.graph.find_route(
                    request.start,
                    request.end,
                    &request.ignore_nodes,
                    &request.ignore_channels,
                );
                if !reply.is_closed() {
                    let _ = reply.send(result);
                }
            }
            RouterMessage::ExcludeChannel(desc, duration) => {
                debug!(
                    "Excluding channel {} towards {} for {:?}",
                    desc.short_channel_id, desc.to_node, duration
                );
                state.graph.exclude(desc);
                let _ = myself.send_after(duration, move || {
                    RouterMessage::LiftChannelExclusion(desc)
                });
            }
            RouterMessage::LiftChannelExclusion(desc) => {
                debug!(
                    "Lifting exclusion of channel {} towards {}",
                    desc.short_channel_id, desc.to_node
                );
                state.graph.reinstate(&desc);
            }
            RouterMessage::LocalChannelChanged { channel_id, update } => match update {
                Some((desc, update)) => state.graph.set_local_update(channel_id, desc, update),
                None => state.graph.remove_local_update(&channel_id),
            },
            RouterMessage::ValidationResult(results) => {
                state.apply_validation_results(&myself, results);
            }
            RouterMessage::WatchNotification(event) => match event {
                WatchEvent::SpentBasic {
                    tag: WatchTag::ExternalChannelSpent(short_channel_id),
                } => {
                    state.remove_spent_channel(short_channel_id);
                }
                other => trace!("Ignoring watch event: {:?}", other),
            },
            RouterMessage::TickValidate => {
                if state.phase == RouterPhase::WaitingForValidation {
                    // One batch at a time; the rest of the stash waits.
                    return Ok(());
                }
                state.start_validation_batch(&myself);
            }
            RouterMessage::TickBroadcast => {
                state.origins.clear();
                if state.rebroadcast_queue.is_empty() {
                    return Ok(());
                }
                let batch = std::mem::take(&mut state.rebroadcast_queue);
                trace!("Draining rebroadcast batch of {} messages", batch.len());
                state.outbound.send(RouterOutbound::GossipBatch(batch));
            }
            RouterMessage::TickPruneStaleChannels => {
                let current_block = state.block_count.load(Ordering::Acquire);
                let now = now_timestamp_as_secs_u64();
                let removed = state.graph.prune_stale_channels(current_block, now);
                if !removed.channels.is_empty() {
                    info!("Pruned {} stale channels", removed.channels.len());
                }
                state.publish_prune_events(removed);
            }
        }
        Ok(())
    }
}

/// The script a channel's funding output must carry: pay-to-witness of
/// the 2-of-2 multisig over both funding keys.
pub(crate) fn funding_script(bitcoin_key_1: &Pubkey, bitcoin_key_2: &Pubkey) -> ScriptBuf {
    let key_1 = bitcoin::PublicKey::new(bitcoin_key_1.0);
    let key_2 = bitcoin::PublicKey::new(bitcoin_key_2.0);
    let witness_script = Builder::new()
        .push_opcode(OP_PUSHNUM_2)
        .push_key(&key_1)
        .push_key(&key_2)
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script();
    ScriptBuf::new_p2wsh(&witness_script.wscript_hash())
}
