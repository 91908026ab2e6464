//! Channel feature negotiation.
//!
//! A channel type is a set of even (mandatory) persistent feature bits
//! that both peers committed to when the channel was opened. Only three
//! types are recognized; anything else is not a valid channel type and
//! must be rejected at open time.

use serde::{Deserialize, Serialize};

/// The features relevant to channel structure and negotiation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    StaticRemoteKey,
    AnchorOutputs,
    Wumbo,
}

impl Feature {
    /// The even bit. The odd (optional) bit is this plus one.
    pub fn mandatory_bit(&self) -> u8 {
        match self {
            Feature::StaticRemoteKey => 12,
            Feature::Wumbo => 18,
            Feature::AnchorOutputs => 20,
        }
    }

    pub fn optional_bit(&self) -> u8 {
        self.mandatory_bit() + 1
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FeatureSupport {
    Mandatory,
    Optional,
}

/// A feature bit vector. Even bits are mandatory, odd bits optional.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Features(u64);

impl Features {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn with(mut self, feature: Feature, support: FeatureSupport) -> Self {
        let bit = match support {
            FeatureSupport::Mandatory => feature.mandatory_bit(),
            FeatureSupport::Optional => feature.optional_bit(),
        };
        self.0 |= 1 << bit;
        self
    }

    pub fn has(&self, feature: Feature, support: FeatureSupport) -> bool {
        let bit = match support {
            FeatureSupport::Mandatory => feature.mandatory_bit(),
            FeatureSupport::Optional => feature.optional_bit(),
        };
        self.0 & (1 << bit) != 0
    }

    /// Whether the feature is activated at all, mandatory or optional.
    pub fn supports(&self, feature: Feature) -> bool {
        self.has(feature, FeatureSupport::Mandatory) || self.has(feature, FeatureSupport::Optional)
    }
}

/// The commitment transaction format implied by the channel features.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommitmentFormat {
    Default,
    AnchorOutputs,
}

/// The recognized channel types, ordered weakest to strongest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelType {
    Standard,
    StaticRemoteKey,
    AnchorOutputs,
}

impl ChannelType {
    /// The exact feature set identifying this channel type.
    pub fn features(&self) -> Features {
        match self {
            ChannelType::Standard => Features::empty(),
            ChannelType::StaticRemoteKey => {
                Features::empty().with(Feature::StaticRemoteKey, FeatureSupport::Mandatory)
            }
            ChannelType::AnchorOutputs => Features::empty()
                .with(Feature::StaticRemoteKey, FeatureSupport::Mandatory)
                .with(Feature::AnchorOutputs, FeatureSupport::Mandatory),
        }
    }

    /// The channel type matching the given feature set exactly, if any.
    pub fn from_features(features: &Features) -> Option<ChannelType> {
        [
            ChannelType::Standard,
            ChannelType::StaticRemoteKey,
            ChannelType::AnchorOutputs,
        ]
        .into_iter()
        .find(|channel_type| channel_type.features() == *features)
    }

    /// The strongest channel type usable by both peers.
    pub fn pick_channel_type(local: &Features, remote: &Features) -> ChannelType {
        let both_support = |feature| local.supports(feature) && remote.supports(feature);
        if both_support(Feature::StaticRemoteKey) && both_support(Feature::AnchorOutputs) {
            ChannelType::AnchorOutputs
        } else if both_support(Feature::StaticRemoteKey) {
            ChannelType::StaticRemoteKey
        } else {
            ChannelType::Standard
        }
    }
}

/// A channel type augmented with the non-structural persistent features
/// both peers activated (currently only wumbo).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelFeatures {
    channel_type: ChannelType,
    extra: Features,
}

impl ChannelFeatures {
    pub fn new(channel_type: ChannelType, local: &Features, remote: &Features) -> Self {
        let mut extra = Features::empty();
        if local.supports(Feature::Wumbo) && remote.supports(Feature::Wumbo) {
            extra = extra.with(Feature::Wumbo, FeatureSupport::Optional);
        }
        Self {
            channel_type,
            extra,
        }
    }

    pub fn negotiate(local: &Features, remote: &Features) -> Self {
        Self::new(ChannelType::pick_channel_type(local, remote), local, remote)
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.channel_type.features().supports(feature) || self.extra.supports(feature)
    }

    /// Whether our main output on the remote commitment pays straight to
    /// the wallet, with no claim transaction needed.
    pub fn pays_directly_to_wallet(&self) -> bool {
        self.has_feature(Feature::StaticRemoteKey) && !self.has_feature(Feature::AnchorOutputs)
    }

    pub fn commitment_format(&self) -> CommitmentFormat {
        if self.has_feature(Feature::AnchorOutputs) {
            CommitmentFormat::AnchorOutputs
        } else {
            CommitmentFormat::Default
        }
    }
}
