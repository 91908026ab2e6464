use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use anyhow::anyhow;
use bitcoin::hashes::{sha256, Hash as _};
use bitcoin::Network;
use once_cell::sync::OnceCell;
use secp256k1::ecdsa::{RecoverableSignature, Signature as Secp256k1Signature};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::Error;

pub fn secp256k1_instance() -> &'static Secp256k1<All> {
    static INSTANCE: OnceCell<Secp256k1<All>> = OnceCell::new();
    INSTANCE.get_or_init(Secp256k1::new)
}

#[serde_as]
#[derive(Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Hash256(#[serde_as(as = "serde_with::hex::Hex")] [u8; 32]);

impl From<[u8; 32]> for Hash256 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Hash256 {
    pub fn into_inner(self) -> [u8; 32] {
        self.0
    }
}

impl ::core::fmt::LowerHex for Hash256 {
    fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        write!(f, "{}", hex::encode(self.0))
    }
}

impl ::core::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
        write!(f, "Hash256({:#x})", self)
    }
}

impl ::core::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
        write!(f, "{:#x}", self)
    }
}

impl FromStr for Hash256 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches("0x");
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(anyhow!("Invalid hash length"));
        }
        let mut data = [0u8; 32];
        data.copy_from_slice(&bytes);
        Ok(Hash256(data))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Privkey(pub SecretKey);

impl From<SecretKey> for Privkey {
    fn from(sk: SecretKey) -> Self {
        Self(sk)
    }
}

impl From<Privkey> for SecretKey {
    fn from(pk: Privkey) -> Self {
        pk.0
    }
}

impl Privkey {
    pub fn from_slice(key: &[u8]) -> Self {
        SecretKey::from_slice(key)
            .expect("Invalid secret key")
            .into()
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::from(self.0.public_key(secp256k1_instance()))
    }

    pub fn sign(&self, message: [u8; 32]) -> EcdsaSignature {
        let message = Message::from_digest(message);
        EcdsaSignature::from(secp256k1_instance().sign_ecdsa(&message, &self.0))
    }

    pub fn sign_ecdsa_recoverable(&self, message: &[u8; 32]) -> RecoverableSignature {
        secp256k1_instance().sign_ecdsa_recoverable(&Message::from_digest(*message), &self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pubkey(pub PublicKey);

impl From<PublicKey> for Pubkey {
    fn from(pk: PublicKey) -> Pubkey {
        Pubkey(pk)
    }
}

impl From<Pubkey> for PublicKey {
    fn from(pk: Pubkey) -> Self {
        pk.0
    }
}

impl From<&Pubkey> for PublicKey {
    fn from(pk: &Pubkey) -> Self {
        pk.0
    }
}

impl Pubkey {
    pub fn serialize(&self) -> [u8; 33] {
        self.0.serialize()
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, secp256k1::Error> {
        PublicKey::from_slice(data).map(Into::into)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.serialize()))
    }
}

/// Identifies the peer a gossip message came in from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Pubkey);

impl From<Pubkey> for PeerId {
    fn from(pk: Pubkey) -> Self {
        Self(pk)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct EcdsaSignature(pub Secp256k1Signature);

impl EcdsaSignature {
    pub fn verify(&self, pubkey: &Pubkey, message: &[u8; 32]) -> bool {
        let message = Message::from_digest(*message);
        secp256k1_instance()
            .verify_ecdsa(&message, &self.0, &pubkey.0)
            .is_ok()
    }
}

impl Hash for EcdsaSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.serialize_compact().hash(state);
    }
}

impl From<Secp256k1Signature> for EcdsaSignature {
    fn from(sig: Secp256k1Signature) -> Self {
        Self(sig)
    }
}

impl From<EcdsaSignature> for Secp256k1Signature {
    fn from(sig: EcdsaSignature) -> Self {
        sig.0
    }
}

/// Packed locator of a funding output: (block:24 | tx_index:24 | vout:16).
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ShortChannelId(u64);

impl ShortChannelId {
    pub fn new(block_height: u32, tx_index: u32, output_index: u16) -> Self {
        debug_assert!(block_height < (1 << 24));
        debug_assert!(tx_index < (1 << 24));
        Self(
            ((block_height as u64) << 40)
                | (((tx_index as u64) & 0xff_ffff) << 16)
                | output_index as u64,
        )
    }

    pub fn block_height(&self) -> u32 {
        (self.0 >> 40) as u32
    }

    pub fn tx_index(&self) -> u32 {
        ((self.0 >> 16) & 0xff_ffff) as u32
    }

    pub fn output_index(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ShortChannelId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.block_height(),
            self.tx_index(),
            self.output_index()
        )
    }
}

impl fmt::Debug for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ShortChannelId({})", self)
    }
}

/// Node alias as announced to the network. Must be a valid utf-8 string of
/// maximal length 32 bytes. Shorter names are zero padded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct AnnouncedNodeName(pub [u8; 32]);

impl AnnouncedNodeName {
    pub fn from_slice(slice: &[u8]) -> Result<Self, String> {
        if slice.len() > 32 {
            return Err("Node name must be at most 32 bytes long".to_string());
        }
        std::str::from_utf8(slice).map_err(|_| "Node name must be valid utf-8".to_string())?;
        let mut name = [0u8; 32];
        name[0..slice.len()].copy_from_slice(slice);
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        let end = self
            .0
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.0.len());
        std::str::from_utf8(&self.0[..end]).expect("valid utf8 enforced on construction")
    }
}

impl FromStr for AnnouncedNodeName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(s.as_bytes())
    }
}

impl fmt::Display for AnnouncedNodeName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

bitflags::bitflags! {
    /// The two-byte flags field of a channel update.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct UpdateFlags: u16 {
        /// Which direction this update refers to: clear means the update
        /// was issued by node_1, set means node_2.
        const DIRECTION = 1;
        /// The channel is temporarily unusable in this direction.
        const DISABLED = 1 << 1;
    }
}

impl Serialize for UpdateFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UpdateFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u16::deserialize(deserializer)?;
        Ok(UpdateFlags::from_bits_retain(bits))
    }
}

/// Announcement of a public channel, signed by both node keys and both
/// funding keys. The funding output it points at is only trusted after
/// on-chain validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAnnouncement {
    pub node_signature_1: Option<EcdsaSignature>,
    pub node_signature_2: Option<EcdsaSignature>,
    pub bitcoin_signature_1: Option<EcdsaSignature>,
    pub bitcoin_signature_2: Option<EcdsaSignature>,
    pub features: u64,
    pub chain_hash: Hash256,
    pub short_channel_id: ShortChannelId,
    /// Invariant: node_id_1 < node_id_2 lexicographically.
    pub node_id_1: Pubkey,
    pub node_id_2: Pubkey,
    pub bitcoin_key_1: Pubkey,
    pub bitcoin_key_2: Pubkey,
}

impl ChannelAnnouncement {
    pub fn new_unsigned(
        node_id_1: &Pubkey,
        node_id_2: &Pubkey,
        short_channel_id: ShortChannelId,
        chain_hash: Hash256,
        bitcoin_key_1: &Pubkey,
        bitcoin_key_2: &Pubkey,
    ) -> Self {
        Self {
            node_signature_1: None,
            node_signature_2: None,
            bitcoin_signature_1: None,
            bitcoin_signature_2: None,
            features: Default::default(),
            chain_hash,
            short_channel_id,
            node_id_1: *node_id_1,
            node_id_2: *node_id_2,
            bitcoin_key_1: *bitcoin_key_1,
            bitcoin_key_2: *bitcoin_key_2,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.node_signature_1.is_some()
            && self.node_signature_2.is_some()
            && self.bitcoin_signature_1.is_some()
            && self.bitcoin_signature_2.is_some()
    }

    pub fn message_to_sign(&self) -> [u8; 32] {
        let unsigned_announcement = Self {
            node_signature_1: None,
            node_signature_2: None,
            bitcoin_signature_1: None,
            bitcoin_signature_2: None,
            ..self.clone()
        };
        deterministically_hash(&unsigned_announcement)
    }

    /// Check all four signatures against the embedded keys.
    pub fn verify_signatures(&self) -> crate::Result<()> {
        let message = self.message_to_sign();
        let signatures = [
            (&self.node_signature_1, &self.node_id_1, "node 1"),
            (&self.node_signature_2, &self.node_id_2, "node 2"),
            (&self.bitcoin_signature_1, &self.bitcoin_key_1, "bitcoin key 1"),
            (&self.bitcoin_signature_2, &self.bitcoin_key_2, "bitcoin key 2"),
        ];
        for (signature, pubkey, name) in signatures {
            let signature = signature.as_ref().ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "Channel announcement {} is missing the {} signature",
                    self.short_channel_id, name
                ))
            })?;
            if !signature.verify(pubkey, &message) {
                return Err(Error::InvalidParameter(format!(
                    "Channel announcement {} has an invalid {} signature",
                    self.short_channel_id, name
                )));
            }
        }
        Ok(())
    }
}

/// Metadata a node announces about itself. Newer timestamps replace older
/// copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    pub signature: Option<EcdsaSignature>,
    pub features: u64,
    pub timestamp: u64,
    pub node_id: Pubkey,
    pub alias: AnnouncedNodeName,
    pub rgb_color: [u8; 3],
    pub addresses: Vec<Vec<u8>>,
}

impl NodeAnnouncement {
    pub fn new_unsigned(
        node_id: Pubkey,
        alias: AnnouncedNodeName,
        addresses: Vec<Vec<u8>>,
        timestamp: u64,
    ) -> Self {
        Self {
            signature: None,
            features: Default::default(),
            timestamp,
            node_id,
            alias,
            rgb_color: [0; 3],
            addresses,
        }
    }

    pub fn new(
        alias: AnnouncedNodeName,
        addresses: Vec<Vec<u8>>,
        private_key: &Privkey,
        timestamp: u64,
    ) -> NodeAnnouncement {
        let mut unsigned =
            NodeAnnouncement::new_unsigned(private_key.pubkey(), alias, addresses, timestamp);
        unsigned.signature = Some(private_key.sign(unsigned.message_to_sign()));
        unsigned
    }

    pub fn message_to_sign(&self) -> [u8; 32] {
        let unsigned_announcement = Self {
            signature: None,
            ..self.clone()
        };
        deterministically_hash(&unsigned_announcement)
    }

    pub fn verify(&self) -> bool {
        match &self.signature {
            Some(signature) => signature.verify(&self.node_id, &self.message_to_sign()),
            None => false,
        }
    }
}

/// Directed routing parameters for one side of a channel. The newest
/// timestamp per direction wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub signature: Option<EcdsaSignature>,
    pub chain_hash: Hash256,
    pub short_channel_id: ShortChannelId,
    pub timestamp: u64,
    pub flags: UpdateFlags,
    pub cltv_expiry_delta: u16,
    pub htlc_minimum_msat: u64,
    pub fee_base_msat: u32,
    pub fee_proportional_millionths: u32,
}

impl ChannelUpdate {
    #[allow(clippy::too_many_arguments)]
    pub fn new_unsigned(
        chain_hash: Hash256,
        short_channel_id: ShortChannelId,
        timestamp: u64,
        flags: UpdateFlags,
        cltv_expiry_delta: u16,
        htlc_minimum_msat: u64,
        fee_base_msat: u32,
        fee_proportional_millionths: u32,
    ) -> Self {
        Self {
            signature: None,
            chain_hash,
            short_channel_id,
            timestamp,
            flags,
            cltv_expiry_delta,
            htlc_minimum_msat,
            fee_base_msat,
            fee_proportional_millionths,
        }
    }

    pub fn message_to_sign(&self) -> [u8; 32] {
        let unsigned_update = Self {
            signature: None,
            ..self.clone()
        };
        deterministically_hash(&unsigned_update)
    }

    pub fn sign(&mut self, private_key: &Privkey) {
        self.signature = Some(private_key.sign(self.message_to_sign()));
    }

    pub fn verify(&self, pubkey: &Pubkey) -> bool {
        match &self.signature {
            Some(signature) => signature.verify(pubkey, &self.message_to_sign()),
            None => false,
        }
    }

    /// False for an update issued by node_1, true for node_2.
    pub fn is_update_of_node_2(&self) -> bool {
        self.flags.contains(UpdateFlags::DIRECTION)
    }

    pub fn is_disabled(&self) -> bool {
        self.flags.contains(UpdateFlags::DISABLED)
    }

    /// The directed edge this update describes, given its announcement.
    pub fn channel_desc(&self, announcement: &ChannelAnnouncement) -> ChannelDesc {
        if self.is_update_of_node_2() {
            ChannelDesc {
                short_channel_id: self.short_channel_id,
                from_node: announcement.node_id_2,
                to_node: announcement.node_id_1,
            }
        } else {
            ChannelDesc {
                short_channel_id: self.short_channel_id,
                from_node: announcement.node_id_1,
                to_node: announcement.node_id_2,
            }
        }
    }
}

/// A directed edge of the channel graph. A channel announcement yields two
/// of these.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDesc {
    pub short_channel_id: ShortChannelId,
    pub from_node: Pubkey,
    pub to_node: Pubkey,
}

/// The three gossip message kinds the router ingests from peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GossipMessage {
    ChannelAnnouncement(ChannelAnnouncement),
    NodeAnnouncement(NodeAnnouncement),
    ChannelUpdate(ChannelUpdate),
}

impl GossipMessage {
    /// The channel this message is about, if any.
    pub fn short_channel_id(&self) -> Option<ShortChannelId> {
        match self {
            GossipMessage::ChannelAnnouncement(announcement) => {
                Some(announcement.short_channel_id)
            }
            GossipMessage::ChannelUpdate(update) => Some(update.short_channel_id),
            GossipMessage::NodeAnnouncement(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GossipMessageWithPeer {
    pub peer_id: PeerId,
    pub message: GossipMessage,
}

static CHAIN_HASH: OnceCell<Hash256> = OnceCell::new();

fn chain_hash_of(network: Network) -> Hash256 {
    Hash256::from(
        bitcoin::constants::ChainHash::using_genesis_block_const(network).to_bytes(),
    )
}

/// Pin the chain hash all gossip is checked against. May only be called
/// once, before any message is processed.
pub fn init_chain_hash(network: Network) {
    CHAIN_HASH
        .set(chain_hash_of(network))
        .expect("init_chain_hash called only once");
}

pub fn get_chain_hash() -> Hash256 {
    *CHAIN_HASH.get_or_init(|| chain_hash_of(Network::Bitcoin))
}

pub fn check_chain_hash(chain_hash: &Hash256) -> crate::Result<()> {
    if chain_hash == &get_chain_hash() {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "Unexpected chain hash {:#x}, expected {:#x}",
            chain_hash,
            get_chain_hash()
        )))
    }
}

pub(crate) fn deterministically_serialize<T: Serialize>(v: &T) -> Vec<u8> {
    serde_json::to_vec_pretty(v).expect("serialize value")
}

/// Hash of the deterministic serialization of a message; the digest that
/// gossip signatures commit to.
pub(crate) fn deterministically_hash<T: Serialize>(v: &T) -> [u8; 32] {
    <sha256::Hash as bitcoin::hashes::Hash>::hash(&deterministically_serialize(v)).to_byte_array()
}

impl PartialOrd for ChannelDesc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelDesc {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.short_channel_id, self.from_node, self.to_node).cmp(&(
            other.short_channel_id,
            other.from_node,
            other.to_node,
        ))
    }
}
