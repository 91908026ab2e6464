use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{
    ChannelAnnouncement, ChannelDesc, ChannelUpdate, Hash256, NodeAnnouncement, Pubkey,
    ShortChannelId,
};

/// Channels whose funding block is older than this many blocks are
/// candidates for stale pruning.
pub(crate) const STALE_CHANNEL_BLOCKS: u64 = 2016;
/// An update younger than this (14 days, in seconds) keeps its channel
/// alive.
pub(crate) const STALE_UPDATE_AGE_SECS: u64 = 1_209_600;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    #[error("cannot route to self")]
    CannotRouteToSelf,
    #[error("route not found")]
    RouteNotFound,
}

/// One hop of a computed route.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub from: Pubkey,
    pub to: Pubkey,
    pub update: ChannelUpdate,
}

/// Channels and nodes removed by a prune, for event reporting.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PruneResult {
    pub channels: Vec<ShortChannelId>,
    pub nodes: Vec<Pubkey>,
}

/// Persistence seam for the network graph. The backend proper is an
/// external collaborator; the graph only issues these calls and reloads
/// everything at startup.
pub trait RouterStore {
    fn get_nodes(&self) -> Vec<NodeAnnouncement>;
    fn get_channels(&self) -> Vec<ChannelAnnouncement>;
    fn get_channel_updates(&self) -> Vec<(ChannelDesc, ChannelUpdate)>;
    fn insert_node(&self, node: NodeAnnouncement);
    fn remove_node(&self, node_id: &Pubkey);
    fn insert_channel(&self, channel: ChannelAnnouncement);
    fn remove_channel(&self, short_channel_id: ShortChannelId);
    fn insert_channel_update(&self, desc: ChannelDesc, update: ChannelUpdate);
    fn remove_channel_update(&self, desc: &ChannelDesc);
}

#[derive(Default)]
struct MemoryStoreInner {
    nodes: HashMap<Pubkey, NodeAnnouncement>,
    channels: HashMap<ShortChannelId, ChannelAnnouncement>,
    updates: HashMap<ChannelDesc, ChannelUpdate>,
}

/// In-memory `RouterStore`, also used as the test double.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl RouterStore for MemoryStore {
    fn get_nodes(&self) -> Vec<NodeAnnouncement> {
        self.inner.read().unwrap().nodes.values().cloned().collect()
    }

    fn get_channels(&self) -> Vec<ChannelAnnouncement> {
        self.inner
            .read()
            .unwrap()
            .channels
            .values()
            .cloned()
            .collect()
    }

    fn get_channel_updates(&self) -> Vec<(ChannelDesc, ChannelUpdate)> {
        self.inner
            .read()
            .unwrap()
            .updates
            .iter()
            .map(|(desc, update)| (*desc, update.clone()))
            .collect()
    }

    fn insert_node(&self, node: NodeAnnouncement) {
        self.inner.write().unwrap().nodes.insert(node.node_id, node);
    }

    fn remove_node(&self, node_id: &Pubkey) {
        self.inner.write().unwrap().nodes.remove(node_id);
    }

    fn insert_channel(&self, channel: ChannelAnnouncement) {
        self.inner
            .write()
            .unwrap()
            .channels
            .insert(channel.short_channel_id, channel);
    }

    fn remove_channel(&self, short_channel_id: ShortChannelId) {
        self.inner
            .write()
            .unwrap()
            .channels
            .remove(&short_channel_id);
    }

    fn insert_channel_update(&self, desc: ChannelDesc, update: ChannelUpdate) {
        self.inner.write().unwrap().updates.insert(desc, update);
    }

    fn remove_channel_update(&self, desc: &ChannelDesc) {
        self.inner.write().unwrap().updates.remove(desc);
    }
}

/// The validated public channel graph plus our own channels' directed
/// parameters. Only the router actor touches it.
pub struct NetworkGraph<S> {
    nodes: HashMap<Pubkey, NodeAnnouncement>,
    channels: HashMap<ShortChannelId, ChannelAnnouncement>,
    updates: HashMap<ChannelDesc, ChannelUpdate>,
    /// Directed parameters of our own channels, keyed by channel id.
    /// These override public updates sharing the same desc.
    local_updates: HashMap<Hash256, (ChannelDesc, ChannelUpdate)>,
    /// Edges temporarily unusable for routing; each has a scheduled lift.
    excluded_channels: HashSet<ChannelDesc>,
    store: S,
}

impl<S: RouterStore> NetworkGraph<S> {
    pub fn new(store: S) -> Self {
        let mut graph = Self {
            nodes: HashMap::new(),
            channels: HashMap::new(),
            updates: HashMap::new(),
            local_updates: HashMap::new(),
            excluded_channels: HashSet::new(),
            store,
        };
        graph.load_from_store();
        graph
    }

    fn load_from_store(&mut self) {
        for channel in self.store.get_channels() {
            self.channels.insert(channel.short_channel_id, channel);
        }
        for node in self.store.get_nodes() {
            self.nodes.insert(node.node_id, node);
        }
        for (desc, update) in self.store.get_channel_updates() {
            if self.channels.contains_key(&desc.short_channel_id) {
                self.updates.insert(desc, update);
            } else {
                warn!(
                    "Dropping stored update for unknown channel {}",
                    desc.short_channel_id
                );
                self.store.remove_channel_update(&desc);
            }
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeAnnouncement> {
        self.nodes.values()
    }

    pub fn get_node(&self, node_id: &Pubkey) -> Option<&NodeAnnouncement> {
        self.nodes.get(node_id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelAnnouncement> {
        self.channels.values()
    }

    pub fn get_channel(&self, short_channel_id: ShortChannelId) -> Option<&ChannelAnnouncement> {
        self.channels.get(&short_channel_id)
    }

    pub fn has_channel(&self, short_channel_id: ShortChannelId) -> bool {
        self.channels.contains_key(&short_channel_id)
    }

    pub fn get_update(&self, desc: &ChannelDesc) -> Option<&ChannelUpdate> {
        self.updates.get(desc)
    }

    pub fn updates(&self) -> impl Iterator<Item = (&ChannelDesc, &ChannelUpdate)> {
        self.updates.iter()
    }

    /// Whether any channel, public or local, has the node as an endpoint.
    pub fn node_has_channels(&self, node_id: &Pubkey) -> bool {
        self.channels
            .values()
            .any(|channel| channel.node_id_1 == *node_id || channel.node_id_2 == *node_id)
            || self
                .local_updates
                .values()
                .any(|(desc, _)| desc.from_node == *node_id || desc.to_node == *node_id)
    }

    /// Whether the node appears in a channel announcement we know of,
    /// admitted or not (callers pass stashed/awaiting announcements).
    pub fn announcement_references_node(
        announcement: &ChannelAnnouncement,
        node_id: &Pubkey,
    ) -> bool {
        announcement.node_id_1 == *node_id || announcement.node_id_2 == *node_id
    }

    /// Store a node announcement unless we already hold a newer copy.
    pub fn add_node(&mut self, node: NodeAnnouncement) -> bool {
        if let Some(existing) = self.nodes.get(&node.node_id) {
            if existing.timestamp >= node.timestamp {
                debug!(
                    "Ignoring outdated node announcement for {}",
                    node.node_id
                );
                return false;
            }
        }
        self.store.insert_node(node.clone());
        self.nodes.insert(node.node_id, node);
        true
    }

    /// Admit a validated channel. Returns false on duplicates.
    pub fn add_channel(&mut self, channel: ChannelAnnouncement) -> bool {
        assert_ne!(channel.node_id_1, channel.node_id_2);
        if self.channels.contains_key(&channel.short_channel_id) {
            return false;
        }
        debug!("Adding channel {} to the graph", channel.short_channel_id);
        self.store.insert_channel(channel.clone());
        self.channels.insert(channel.short_channel_id, channel);
        true
    }

    /// Store a channel update unless the stored one is at least as new.
    pub fn apply_update(&mut self, desc: ChannelDesc, update: ChannelUpdate) -> bool {
        if let Some(existing) = self.updates.get(&desc) {
            if existing.timestamp >= update.timestamp {
                debug!(
                    "Ignoring outdated channel update for {}",
                    desc.short_channel_id
                );
                return false;
            }
        }
        self.store.insert_channel_update(desc, update.clone());
        self.updates.insert(desc, update);
        true
    }

    /// Remove a channel and cascade: drop its updates and any endpoint
    /// left without channels. Returns what was removed.
    pub fn remove_channel(&mut self, short_channel_id: ShortChannelId) -> Option<PruneResult> {
        let channel = self.channels.remove(&short_channel_id)?;
        self.store.remove_channel(short_channel_id);
        let dead_updates = self
            .updates
            .keys()
            .filter(|desc| desc.short_channel_id == short_channel_id)
            .copied()
            .collect::<Vec<_>>();
        for desc in dead_updates {
            self.updates.remove(&desc);
            self.store.remove_channel_update(&desc);
        }
        let mut result = PruneResult {
            channels: vec![short_channel_id],
            nodes: vec![],
        };
        for node_id in [channel.node_id_1, channel.node_id_2] {
            if self.nodes.contains_key(&node_id) && !self.node_has_channels(&node_id) {
                self.nodes.remove(&node_id);
                self.store.remove_node(&node_id);
                result.nodes.push(node_id);
            }
        }
        Some(result)
    }

    pub fn set_local_update(
        &mut self,
        channel_id: Hash256,
        desc: ChannelDesc,
        update: ChannelUpdate,
    ) {
        self.local_updates.insert(channel_id, (desc, update));
    }

    pub fn remove_local_update(&mut self, channel_id: &Hash256) {
        self.local_updates.remove(channel_id);
    }

    pub fn exclude(&mut self, desc: ChannelDesc) {
        self.excluded_channels.insert(desc);
    }

    pub fn reinstate(&mut self, desc: &ChannelDesc) {
        self.excluded_channels.remove(desc);
    }

    /// A channel is stale iff its funding block is older than 2016 blocks
    /// AND neither direction saw an update in the last 14 days.
    pub fn prune_stale_channels(&mut self, current_block: u64, now: u64) -> PruneResult {
        let height_horizon = current_block.saturating_sub(STALE_CHANNEL_BLOCKS);
        let update_horizon = now.saturating_sub(STALE_UPDATE_AGE_SECS);
        let stale = self
            .channels
            .values()
            .filter(|channel| {
                if (channel.short_channel_id.block_height() as u64) >= height_horizon {
                    return false;
                }
                let fresh_update = self
                    .updates
                    .iter()
                    .any(|(desc, update)| {
                        desc.short_channel_id == channel.short_channel_id
                            && update.timestamp >= update_horizon
                    });
                !fresh_update
            })
            .map(|channel| channel.short_channel_id)
            .collect::<Vec<_>>();

        let mut result = PruneResult::default();
        for short_channel_id in stale {
            debug!("Pruning stale channel {}", short_channel_id);
            if let Some(removed) = self.remove_channel(short_channel_id) {
                result.channels.extend(removed.channels);
                result.nodes.extend(removed.nodes);
            }
        }
        result
    }

    /// Shortest path over the currently usable directed edges.
    ///
    /// Edges carry unit weight; ties are broken by shuffling the edge
    /// iteration order each call so repeated routing over an equi-cost
    /// graph does not always favor a single path.
    pub fn find_route(
        &self,
        start: Pubkey,
        end: Pubkey,
        ignore_nodes: &HashSet<Pubkey>,
        ignore_channels: &HashSet<ShortChannelId>,
    ) -> Result<Vec<Hop>, RouteError> {
        if start == end {
            return Err(RouteError::CannotRouteToSelf);
        }

        // Local updates override public ones sharing the same desc.
        let mut edges: HashMap<ChannelDesc, &ChannelUpdate> = self
            .updates
            .iter()
            .map(|(desc, update)| (*desc, update))
            .collect();
        for (desc, update) in self.local_updates.values() {
            edges.insert(*desc, update);
        }

        let mut adjacency: HashMap<Pubkey, Vec<(ChannelDesc, &ChannelUpdate)>> = HashMap::new();
        for (desc, update) in edges {
            if self.excluded_channels.contains(&desc)
                || ignore_channels.contains(&desc.short_channel_id)
                || ignore_nodes.contains(&desc.from_node)
                || ignore_nodes.contains(&desc.to_node)
                || update.is_disabled()
            {
                continue;
            }
            adjacency.entry(desc.from_node).or_default().push((desc, update));
        }
        let mut rng = rand::thread_rng();
        for neighbors in adjacency.values_mut() {
            neighbors.shuffle(&mut rng);
        }

        let mut distances: HashMap<Pubkey, u64> = HashMap::new();
        let mut previous: HashMap<Pubkey, (ChannelDesc, ChannelUpdate)> = HashMap::new();
        let mut heap: BinaryHeap<std::cmp::Reverse<(u64, Pubkey)>> = BinaryHeap::new();
        distances.insert(start, 0);
        heap.push(std::cmp::Reverse((0, start)));

        while let Some(std::cmp::Reverse((distance, node))) = heap.pop() {
            if node == end {
                break;
            }
            if distance > *distances.get(&node).unwrap_or(&u64::MAX) {
                continue;
            }
            let Some(neighbors) = adjacency.get(&node) else {
                continue;
            };
            for &(desc, update) in neighbors {
                let next_distance = distance + edge_weight(update);
                if next_distance < *distances.get(&desc.to_node).unwrap_or(&u64::MAX) {
                    distances.insert(desc.to_node, next_distance);
                    previous.insert(desc.to_node, (desc, update.clone()));
                    heap.push(std::cmp::Reverse((next_distance, desc.to_node)));
                }
            }
        }

        let mut hops = Vec::new();
        let mut current = end;
        while current != start {
            let Some((desc, update)) = previous.get(&current) else {
                return Err(RouteError::RouteNotFound);
            };
            hops.push(Hop {
                from: desc.from_node,
                to: desc.to_node,
                update: update.clone(),
            });
            current = desc.from_node;
        }
        hops.reverse();
        debug_assert!(!hops.is_empty());
        Ok(hops)
    }

}

/// All edges cost the same in this core; fee and CLTV scoring would slot
/// in here.
fn edge_weight(_update: &ChannelUpdate) -> u64 {
    1
}
