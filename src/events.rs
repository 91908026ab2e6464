use std::sync::Arc;

use ractor::{ActorRef, Message, OutputPort};

use crate::router::types::{Pubkey, ShortChannelId};

/// Lifecycle notifications published by the node's subsystems.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A public channel passed on-chain validation and entered the graph.
    ChannelAnnounced(ShortChannelId),
    /// A channel left the graph, either because its funding output was
    /// spent or because it went stale.
    ChannelLost(ShortChannelId),
    /// A node lost its last incident channel and was removed.
    NodeLost(Pubkey),
}

/// Multi-consumer broadcast for [`NodeEvent`]s.
///
/// Every subscriber registered before an event is published receives it,
/// converted into its own message type. Subscriptions end with the
/// receiving actor.
#[derive(Clone)]
pub struct EventBus {
    port: Arc<OutputPort<NodeEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            port: Arc::new(OutputPort::default()),
        }
    }

    pub fn publish(&self, event: NodeEvent) {
        self.port.send(event);
    }

    pub fn subscribe<M, F>(&self, receiver: ActorRef<M>, converter: F)
    where
        M: Message,
        F: Fn(NodeEvent) -> Option<M> + Send + 'static,
    {
        self.port.subscribe(receiver, converter);
    }
}
