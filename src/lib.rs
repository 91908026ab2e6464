mod config;
pub use config::Config;

pub mod chain;
pub use chain::{start_chain, ChainActor, ChainConfig, ChainMessage};
pub mod channel;
pub mod invoice;
pub mod router;
pub use router::{start_router, RouterConfig, RouterMessage};

mod errors;
pub use errors::{Error, Result};

pub mod actors;
pub mod events;
pub mod tasks;

/// Seconds since the unix epoch. Gossip and invoice timestamps use this.
pub fn now_timestamp_as_secs_u64() -> u64 {
    std::time::UNIX_EPOCH
        .elapsed()
        .expect("duration since unix epoch")
        .as_secs()
}
