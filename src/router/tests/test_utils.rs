use std::sync::Arc;

use bitcoin::{absolute, transaction, Amount, OutPoint, Transaction, TxOut};
use ractor::{
    async_trait as rasync_trait, concurrency::Duration, Actor, ActorProcessingErr, ActorRef,
    OutputPort,
};
use secp256k1::SecretKey;
use tokio::sync::RwLock;

use crate::chain::tests::test_utils::{create_chain_actor_with_block_count, MockChain};
use crate::chain::ChainMessage;
use crate::events::{EventBus, NodeEvent};
use crate::now_timestamp_as_secs_u64;
use crate::router::actor::{funding_script, RouterTickIntervals};
use crate::router::graph::{MemoryStore, NetworkGraph};
use crate::router::types::{
    get_chain_hash, AnnouncedNodeName, ChannelAnnouncement, ChannelDesc, ChannelUpdate,
    GossipMessage, GossipMessageWithPeer, NodeAnnouncement, PeerId, Privkey, Pubkey,
    ShortChannelId, UpdateFlags,
};
use crate::router::{RouterActor, RouterMessage, RouterOutbound};

pub fn generate_keypair() -> Privkey {
    Privkey::from(SecretKey::new(&mut rand::thread_rng()))
}

pub fn generate_pubkey() -> Pubkey {
    generate_keypair().pubkey()
}

pub fn random_peer_id() -> PeerId {
    PeerId::from(generate_pubkey())
}

/// A fully signed channel announcement together with its funding
/// transaction, ready to be confirmed on a mock chain.
pub struct ChannelTestContext {
    pub node1_key: Privkey,
    pub node2_key: Privkey,
    pub funding_key_1: Privkey,
    pub funding_key_2: Privkey,
    pub announcement: ChannelAnnouncement,
    pub funding_tx: Transaction,
}

impl ChannelTestContext {
    pub fn gen(block_height: u32, tx_index: u32) -> Self {
        Self::gen_between(generate_keypair(), generate_keypair(), block_height, tx_index)
    }

    pub fn gen_between(
        key_a: Privkey,
        key_b: Privkey,
        block_height: u32,
        tx_index: u32,
    ) -> Self {
        let (node1_key, node2_key) = if key_a.pubkey() < key_b.pubkey() {
            (key_a, key_b)
        } else {
            (key_b, key_a)
        };
        let funding_key_1 = generate_keypair();
        let funding_key_2 = generate_keypair();
        let short_channel_id = ShortChannelId::new(block_height, tx_index, 0);
        let funding_tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(100_000),
                script_pubkey: funding_script(&funding_key_1.pubkey(), &funding_key_2.pubkey()),
            }],
        };
        let mut announcement = ChannelAnnouncement::new_unsigned(
            &node1_key.pubkey(),
            &node2_key.pubkey(),
            short_channel_id,
            get_chain_hash(),
            &funding_key_1.pubkey(),
            &funding_key_2.pubkey(),
        );
        let message = announcement.message_to_sign();
        announcement.node_signature_1 = Some(node1_key.sign(message));
        announcement.node_signature_2 = Some(node2_key.sign(message));
        announcement.bitcoin_signature_1 = Some(funding_key_1.sign(message));
        announcement.bitcoin_signature_2 = Some(funding_key_2.sign(message));
        Self {
            node1_key,
            node2_key,
            funding_key_1,
            funding_key_2,
            announcement,
            funding_tx,
        }
    }

    pub fn short_channel_id(&self) -> ShortChannelId {
        self.announcement.short_channel_id
    }

    pub fn funding_outpoint(&self) -> OutPoint {
        OutPoint::new(self.funding_tx.compute_txid(), 0)
    }

    /// A signed update issued by the given endpoint key.
    pub fn update_from(
        &self,
        from: &Privkey,
        timestamp: u64,
        extra_flags: UpdateFlags,
    ) -> ChannelUpdate {
        let mut flags = extra_flags;
        if from.pubkey() == self.announcement.node_id_2 {
            flags |= UpdateFlags::DIRECTION;
        }
        let mut update = ChannelUpdate::new_unsigned(
            get_chain_hash(),
            self.short_channel_id(),
            timestamp,
            flags,
            144,
            1000,
            1000,
            100,
        );
        update.sign(from);
        update
    }

    pub fn desc_from(&self, from: &Privkey) -> ChannelDesc {
        if from.pubkey() == self.announcement.node_id_2 {
            ChannelDesc {
                short_channel_id: self.short_channel_id(),
                from_node: self.announcement.node_id_2,
                to_node: self.announcement.node_id_1,
            }
        } else {
            ChannelDesc {
                short_channel_id: self.short_channel_id(),
                from_node: self.announcement.node_id_1,
                to_node: self.announcement.node_id_2,
            }
        }
    }

    pub fn node_announcement_of(&self, key: &Privkey, timestamp: u64) -> NodeAnnouncement {
        NodeAnnouncement::new(
            AnnouncedNodeName::from_slice(b"test-node").expect("valid name"),
            vec![],
            key,
            timestamp,
        )
    }
}

pub fn create_invalid_ecdsa_signature() -> crate::router::types::EcdsaSignature {
    let key = generate_keypair();
    // A valid signature over an unrelated message.
    key.sign([0x42; 32])
}

/// A graph over numbered keys with direct edge manipulation, bypassing
/// gossip and validation.
pub struct MockNetworkGraph {
    pub keys: Vec<Privkey>,
    pub graph: NetworkGraph<MemoryStore>,
    next_block: u32,
}

impl MockNetworkGraph {
    pub fn new(node_num: usize) -> Self {
        let keys = (0..node_num).map(|_| generate_keypair()).collect();
        Self {
            keys,
            graph: NetworkGraph::new(MemoryStore::new()),
            next_block: 0,
        }
    }

    pub fn pubkey(&self, index: usize) -> Pubkey {
        self.keys[index].pubkey()
    }

    pub fn add_edge(&mut self, from: usize, to: usize) -> ChannelDesc {
        self.add_edge_opts(from, to, None, None, false)
    }

    pub fn add_edge_opts(
        &mut self,
        from: usize,
        to: usize,
        short_channel_id: Option<ShortChannelId>,
        update_timestamp: Option<u64>,
        disabled: bool,
    ) -> ChannelDesc {
        let from_key = self.pubkey(from);
        let to_key = self.pubkey(to);
        let (node_id_1, node_id_2) = if from_key < to_key {
            (from_key, to_key)
        } else {
            (to_key, from_key)
        };
        let short_channel_id = short_channel_id.unwrap_or_else(|| {
            self.next_block += 1;
            ShortChannelId::new(self.next_block, 0, 0)
        });
        let announcement = ChannelAnnouncement::new_unsigned(
            &node_id_1,
            &node_id_2,
            short_channel_id,
            get_chain_hash(),
            &node_id_1,
            &node_id_2,
        );
        self.graph.add_channel(announcement);
        for node_id in [from_key, to_key] {
            if self.graph.get_node(&node_id).is_none() {
                self.graph.add_node(NodeAnnouncement::new_unsigned(
                    node_id,
                    AnnouncedNodeName::default(),
                    vec![],
                    1,
                ));
            }
        }
        let mut flags = UpdateFlags::empty();
        if from_key == node_id_2 {
            flags |= UpdateFlags::DIRECTION;
        }
        if disabled {
            flags |= UpdateFlags::DISABLED;
        }
        let update = ChannelUpdate::new_unsigned(
            get_chain_hash(),
            short_channel_id,
            update_timestamp.unwrap_or_else(now_timestamp_as_secs_u64),
            flags,
            144,
            1000,
            1000,
            100,
        );
        let desc = ChannelDesc {
            short_channel_id,
            from_node: from_key,
            to_node: to_key,
        };
        self.graph.apply_update(desc, update);
        desc
    }

    pub fn find_route(
        &self,
        from: usize,
        to: usize,
    ) -> Result<Vec<crate::router::graph::Hop>, crate::router::graph::RouteError> {
        self.graph.find_route(
            self.pubkey(from),
            self.pubkey(to),
            &Default::default(),
            &Default::default(),
        )
    }
}

pub struct OutboundCollectorMessage(pub RouterOutbound);

pub struct OutboundCollector;

#[rasync_trait]
impl Actor for OutboundCollector {
    type Msg = OutboundCollectorMessage;
    type State = Arc<RwLock<Vec<RouterOutbound>>>;
    type Arguments = Arc<RwLock<Vec<RouterOutbound>>>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        messages: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(messages)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.write().await.push(message.0);
        Ok(())
    }
}

pub struct NodeEventCollectorMessage(pub NodeEvent);

pub struct NodeEventCollector;

#[rasync_trait]
impl Actor for NodeEventCollector {
    type Msg = NodeEventCollectorMessage;
    type State = Arc<RwLock<Vec<NodeEvent>>>;
    type Arguments = Arc<RwLock<Vec<NodeEvent>>>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        events: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(events)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.write().await.push(message.0);
        Ok(())
    }
}

/// A router wired to a mock chain, with collectors on the outbound port
/// and the event bus.
pub struct RouterTestContext {
    pub mock: MockChain,
    pub chain: ActorRef<ChainMessage>,
    pub router: ActorRef<RouterMessage>,
    pub outbound: Arc<RwLock<Vec<RouterOutbound>>>,
    pub node_events: Arc<RwLock<Vec<NodeEvent>>>,
}

impl RouterTestContext {
    pub async fn new() -> Self {
        let mock = MockChain::new();
        let (chain, block_count) = create_chain_actor_with_block_count(mock.clone()).await;

        let outbound = Arc::new(RwLock::new(Vec::new()));
        let (outbound_actor, _) = Actor::spawn(None, OutboundCollector, Arc::clone(&outbound))
            .await
            .expect("start outbound collector");
        let outbound_port: Arc<OutputPort<RouterOutbound>> = Arc::new(OutputPort::default());
        outbound_port.subscribe(outbound_actor, |message| {
            Some(OutboundCollectorMessage(message))
        });

        let node_events = Arc::new(RwLock::new(Vec::new()));
        let (event_actor, _) = Actor::spawn(None, NodeEventCollector, Arc::clone(&node_events))
            .await
            .expect("start node event collector");
        let events = EventBus::new();
        events.subscribe(event_actor, |event| Some(NodeEventCollectorMessage(event)));

        // Broadcast and prune are driven manually in tests.
        let intervals = RouterTickIntervals {
            validate: Duration::from_millis(100),
            broadcast: Duration::from_secs(3600),
            prune: Duration::from_secs(3600),
        };
        let (router, _) = Actor::spawn(
            None,
            RouterActor::new(),
            (
                MemoryStore::new(),
                chain.clone(),
                block_count,
                events,
                outbound_port,
                intervals,
            ),
        )
        .await
        .expect("start router actor");

        Self {
            mock,
            chain,
            router,
            outbound,
            node_events,
        }
    }

    pub fn ingest(&self, message: GossipMessage, peer_id: PeerId) {
        self.router
            .send_message(RouterMessage::GossipReceived(GossipMessageWithPeer {
                peer_id,
                message,
            }))
            .expect("router actor alive");
    }

    /// Confirm the context's funding transaction at the coordinates its
    /// short channel id encodes.
    pub fn confirm_funding(&self, context: &ChannelTestContext) {
        let short_channel_id = context.short_channel_id();
        self.mock.confirm_tx(
            context.funding_tx.clone(),
            short_channel_id.block_height() as u64,
            short_channel_id.tx_index(),
        );
    }

    pub async fn find_route(
        &self,
        start: Pubkey,
        end: Pubkey,
    ) -> Result<Vec<crate::router::graph::Hop>, crate::router::graph::RouteError> {
        ractor::call!(
            self.router,
            RouterMessage::FindRoute,
            crate::router::actor::RouteRequest {
                start,
                end,
                ignore_nodes: Default::default(),
                ignore_channels: Default::default(),
            }
        )
        .expect("router actor alive")
    }
}

/// Time for a validate tick plus the chain round-trip.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}
