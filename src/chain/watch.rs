use bitcoin::{OutPoint, Transaction, Txid};
use ractor::{ActorRef, ActorStatus};

use crate::router::types::ShortChannelId;

/// What a watch is about. Echoed back in the resulting event so the
/// consumer can tell its watches apart.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchTag {
    /// The funding output of a public channel was spent on chain.
    ExternalChannelSpent(ShortChannelId),
    /// A transaction we care about reached its requested depth.
    TxConfirmed(Txid),
    /// A parent of a CSV-delayed transaction reached the CSV depth; the
    /// boxed child re-enters the publish path.
    ParentConfirmed(Box<Transaction>),
}

/// A condition registered with the chain watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Watch {
    /// Fires once when the output appears spent. The output may already be
    /// spent at registration time.
    SpentBasic {
        tx_id: Txid,
        output_index: u32,
        tag: WatchTag,
    },
    /// Fires on every spending transaction observed. Never removed: a
    /// funding output may be spent by several candidate commitment
    /// transactions in a race, and the consumer must hear about each.
    Spent {
        tx_id: Txid,
        output_index: u32,
        tag: WatchTag,
    },
    /// Fires once when the transaction reaches `min_depth` confirmations.
    Confirmed {
        tx_id: Txid,
        min_depth: u64,
        tag: WatchTag,
    },
}

impl Watch {
    /// The watched outpoint, for the two spent kinds.
    pub fn outpoint(&self) -> Option<OutPoint> {
        match self {
            Watch::SpentBasic {
                tx_id,
                output_index,
                ..
            }
            | Watch::Spent {
                tx_id,
                output_index,
                ..
            } => Some(OutPoint::new(*tx_id, *output_index)),
            Watch::Confirmed { .. } => None,
        }
    }

    pub fn tag(&self) -> &WatchTag {
        match self {
            Watch::SpentBasic { tag, .. }
            | Watch::Spent { tag, .. }
            | Watch::Confirmed { tag, .. } => tag,
        }
    }
}

/// Notification delivered to a watch's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    SpentBasic {
        tag: WatchTag,
    },
    Spent {
        tag: WatchTag,
        spending_tx: Transaction,
    },
    Confirmed {
        tag: WatchTag,
        block_height: u64,
        tx_index: u32,
        tx: Transaction,
    },
}

/// A capability handle to whoever registered a watch.
///
/// The watcher does not control the consumer's lifetime: handles whose
/// actor is gone are reaped on the next tick and their watches silently
/// dropped.
pub trait WatchConsumer: Send + Sync {
    fn deliver(&self, event: WatchEvent);
    fn is_alive(&self) -> bool;
}

impl<M> WatchConsumer for ActorRef<M>
where
    M: ractor::Message + From<WatchEvent>,
{
    fn deliver(&self, event: WatchEvent) {
        // The consumer may have just gone away; the reap will catch it.
        let _ = self.send_message(M::from(event));
    }

    fn is_alive(&self) -> bool {
        matches!(
            self.get_status(),
            ActorStatus::Starting | ActorStatus::Running | ActorStatus::Upgrading
        )
    }
}
