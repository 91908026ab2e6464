use ractor::SpawnErr;
use thiserror::Error;

use crate::chain::ChainRpcError;
use crate::router::types::{PeerId, ShortChannelId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Peer not found error: {0:?}")]
    PeerNotFound(PeerId),
    #[error("Channel not found error: {0:?}")]
    ChannelNotFound(ShortChannelId),
    #[error("Chain RPC error: {0}")]
    ChainRpc(#[from] ChainRpcError),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Failed to spawn actor: {0}")]
    SpawnErr(#[from] SpawnErr),
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
