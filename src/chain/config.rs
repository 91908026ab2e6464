use clap_serde_derive::{
    clap::{self},
    ClapSerde,
};

/// Default backend poll period, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

// See the comment in `Config` for why arg names are prefixed with
// `chain-`/`CHAIN_`.
#[derive(ClapSerde, Debug, Clone)]
pub struct ChainConfig {
    /// bitcoind JSON-RPC endpoint
    #[arg(
        name = "CHAIN_BITCOIND_RPC_URL",
        long = "chain-bitcoind-rpc-url",
        env,
        help = "bitcoind JSON-RPC endpoint [default: http://127.0.0.1:8332]"
    )]
    #[default("http://127.0.0.1:8332".to_string())]
    pub bitcoind_rpc_url: String,

    /// bitcoind JSON-RPC user
    #[arg(name = "CHAIN_BITCOIND_RPC_USER", long = "chain-bitcoind-rpc-user", env)]
    pub bitcoind_rpc_user: Option<String>,

    /// bitcoind JSON-RPC password
    #[arg(
        name = "CHAIN_BITCOIND_RPC_PASSWORD",
        long = "chain-bitcoind-rpc-password",
        env
    )]
    pub bitcoind_rpc_password: Option<String>,

    /// name of the bitcoin network (can be any of `bitcoin`/`testnet`/`signet`/`regtest`)
    #[arg(
        name = "CHAIN_NETWORK",
        long = "chain-network",
        env,
        help = "name of the bitcoin network (can be any of `bitcoin`/`testnet`/`signet`/`regtest`) [default: bitcoin]"
    )]
    pub network: Option<String>,

    /// backend poll period in milliseconds
    #[arg(
        name = "CHAIN_POLL_INTERVAL_MS",
        long = "chain-poll-interval-ms",
        env,
        help = "backend poll period in milliseconds [default: 2000]"
    )]
    pub poll_interval_ms: Option<u64>,
}
