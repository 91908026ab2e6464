use async_trait::async_trait;
use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use tokio::task::block_in_place;
use tracing::trace;

use super::error::ChainRpcError;

/// How far back `find_spending_tx` walks the chain before giving up.
const SPEND_SCAN_DEPTH: u64 = 720;

/// Best-effort block metadata for a confirmed transaction.
#[derive(Debug, Clone)]
pub struct TxBlockMeta {
    pub block_hash: BlockHash,
    pub block_height: u64,
    /// Position of the transaction within its block.
    pub tx_index: u32,
}

#[derive(Debug, Clone)]
pub struct TxWithMeta {
    pub tx: Transaction,
    pub meta: Option<TxBlockMeta>,
}

/// The Bitcoin backend RPC surface the watcher consumes. Stateless per
/// call; shared freely between tasks.
#[async_trait]
pub trait ChainRpc: Send + Sync + 'static {
    async fn get_block_count(&self) -> Result<u64, ChainRpcError>;

    async fn get_raw_transaction(&self, txid: Txid) -> Result<Option<Transaction>, ChainRpcError>;

    /// Confirmation count, or None for an unknown/unconfirmed transaction.
    async fn get_tx_confirmations(&self, txid: Txid) -> Result<Option<u64>, ChainRpcError>;

    async fn get_tx_block_meta(&self, txid: Txid) -> Result<Option<TxBlockMeta>, ChainRpcError>;

    /// Locate a confirmed transaction by block height and index, the
    /// coordinates a short channel id encodes.
    async fn get_tx_for_location(
        &self,
        block_height: u64,
        tx_index: u32,
    ) -> Result<Option<Transaction>, ChainRpcError>;

    /// gettxout-style spendability: false once a spend is seen, in the
    /// mempool too when `include_mempool` is set.
    async fn is_output_spendable(
        &self,
        outpoint: OutPoint,
        include_mempool: bool,
    ) -> Result<bool, ChainRpcError>;

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>, ChainRpcError>;

    /// Find the transaction spending the outpoint, scanning the mempool
    /// first and recent blocks after that.
    async fn find_spending_tx(
        &self,
        outpoint: OutPoint,
    ) -> Result<Option<Transaction>, ChainRpcError>;

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, ChainRpcError>;
}

/// `ChainRpc` over a bitcoind JSON-RPC endpoint. The underlying client is
/// synchronous, so every call goes through `block_in_place`.
pub struct BitcoindClient {
    inner: Client,
}

impl BitcoindClient {
    pub fn new(
        url: &str,
        user: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ChainRpcError> {
        let auth = match (user, password) {
            (Some(user), Some(password)) => Auth::UserPass(user, password),
            _ => Auth::None,
        };
        let inner = Client::new(url, auth)?;
        Ok(Self { inner })
    }

    fn get_raw_transaction_blocking(
        &self,
        txid: Txid,
    ) -> Result<Option<Transaction>, ChainRpcError> {
        match self.inner.get_raw_transaction(&txid, None) {
            Ok(tx) => Ok(Some(tx)),
            Err(err) => {
                let err = ChainRpcError::from(err);
                if err.is_tx_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn get_tx_block_meta_blocking(
        &self,
        txid: Txid,
    ) -> Result<Option<TxBlockMeta>, ChainRpcError> {
        let info = match self.inner.get_raw_transaction_info(&txid, None) {
            Ok(info) => info,
            Err(err) => {
                let err = ChainRpcError::from(err);
                return if err.is_tx_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                };
            }
        };
        let Some(block_hash) = info.blockhash else {
            return Ok(None);
        };
        let block = self.inner.get_block_info(&block_hash)?;
        let Some(tx_index) = block.tx.iter().position(|id| *id == txid) else {
            return Ok(None);
        };
        Ok(Some(TxBlockMeta {
            block_hash,
            block_height: block.height as u64,
            tx_index: tx_index as u32,
        }))
    }
}

#[async_trait]
impl ChainRpc for BitcoindClient {
    async fn get_block_count(&self) -> Result<u64, ChainRpcError> {
        block_in_place(|| Ok(self.inner.get_block_count()?))
    }

    async fn get_raw_transaction(&self, txid: Txid) -> Result<Option<Transaction>, ChainRpcError> {
        block_in_place(|| self.get_raw_transaction_blocking(txid))
    }

    async fn get_tx_confirmations(&self, txid: Txid) -> Result<Option<u64>, ChainRpcError> {
        block_in_place(|| match self.inner.get_raw_transaction_info(&txid, None) {
            Ok(info) => Ok(info.confirmations.map(|confirmations| confirmations as u64)),
            Err(err) => {
                let err = ChainRpcError::from(err);
                if err.is_tx_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        })
    }

    async fn get_tx_block_meta(&self, txid: Txid) -> Result<Option<TxBlockMeta>, ChainRpcError> {
        block_in_place(|| self.get_tx_block_meta_blocking(txid))
    }

    async fn get_tx_for_location(
        &self,
        block_height: u64,
        tx_index: u32,
    ) -> Result<Option<Transaction>, ChainRpcError> {
        block_in_place(|| {
            if block_height > self.inner.get_block_count()? {
                return Ok(None);
            }
            let block_hash = self.inner.get_block_hash(block_height)?;
            let block = self.inner.get_block(&block_hash)?;
            Ok(block.txdata.get(tx_index as usize).cloned())
        })
    }

    async fn is_output_spendable(
        &self,
        outpoint: OutPoint,
        include_mempool: bool,
    ) -> Result<bool, ChainRpcError> {
        block_in_place(|| {
            let result =
                self.inner
                    .get_tx_out(&outpoint.txid, outpoint.vout, Some(include_mempool))?;
            Ok(result.is_some())
        })
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>, ChainRpcError> {
        block_in_place(|| Ok(self.inner.get_raw_mempool()?))
    }

    async fn find_spending_tx(
        &self,
        outpoint: OutPoint,
    ) -> Result<Option<Transaction>, ChainRpcError> {
        block_in_place(|| {
            for txid in self.inner.get_raw_mempool()? {
                if let Some(tx) = self.get_raw_transaction_blocking(txid)? {
                    if tx.input.iter().any(|input| input.previous_output == outpoint) {
                        return Ok(Some(tx));
                    }
                }
            }
            let tip = self.inner.get_block_count()?;
            let floor = tip.saturating_sub(SPEND_SCAN_DEPTH);
            let mut height = tip;
            while height > floor {
                let block_hash = self.inner.get_block_hash(height)?;
                let block = self.inner.get_block(&block_hash)?;
                trace!(height, "scanning block for spending transaction");
                for tx in block.txdata {
                    if tx.input.iter().any(|input| input.previous_output == outpoint) {
                        return Ok(Some(tx));
                    }
                }
                height -= 1;
            }
            Ok(None)
        })
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, ChainRpcError> {
        block_in_place(|| match self.inner.send_raw_transaction(tx) {
            Ok(txid) => Ok(txid),
            Err(err) => {
                let err = ChainRpcError::from(err);
                if err.is_missing_inputs() {
                    Err(ChainRpcError::MissingInputs(tx.compute_txid()))
                } else {
                    Err(err)
                }
            }
        })
    }
}
