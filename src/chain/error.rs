use bitcoin::Txid;
use thiserror::Error;

/// bitcoind RPC error code for a transaction whose inputs are missing
/// from both the utxo set and the mempool.
const RPC_ERROR_MISSING_INPUTS: i32 = -25;
/// bitcoind RPC error code for an unknown transaction.
const RPC_ERROR_TX_NOT_FOUND: i32 = -5;

#[derive(Error, Debug)]
pub enum ChainRpcError {
    #[error("bitcoind RPC error: {0}")]
    Rpc(#[from] bitcoincore_rpc::Error),
    #[error("transaction {0} has missing inputs")]
    MissingInputs(Txid),
    #[error("chain RPC error: {0}")]
    Other(String),
}

impl ChainRpcError {
    /// A transient broadcast failure caused by a mempool race with a
    /// parent transaction. Worth exactly one retry.
    pub fn is_missing_inputs(&self) -> bool {
        match self {
            ChainRpcError::MissingInputs(_) => true,
            ChainRpcError::Rpc(err) => rpc_error_code(err) == Some(RPC_ERROR_MISSING_INPUTS),
            _ => false,
        }
    }

    pub(crate) fn is_tx_not_found(&self) -> bool {
        match self {
            ChainRpcError::Rpc(err) => rpc_error_code(err) == Some(RPC_ERROR_TX_NOT_FOUND),
            _ => false,
        }
    }
}

fn rpc_error_code(err: &bitcoincore_rpc::Error) -> Option<i32> {
    match err {
        bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Rpc(rpc_error)) => {
            Some(rpc_error.code)
        }
        _ => None,
    }
}
