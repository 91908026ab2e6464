pub mod features;

pub use features::{
    ChannelFeatures, ChannelType, CommitmentFormat, Feature, FeatureSupport, Features,
};
