use clap_serde_derive::{
    clap::{self},
    ClapSerde,
};

// See the comment in `Config` for why arg names are prefixed with
// `router-`/`ROUTER_`.
#[derive(ClapSerde, Debug, Clone)]
pub struct RouterConfig {
    /// seconds between rebroadcast batches
    #[arg(
        name = "ROUTER_BROADCAST_INTERVAL_SECS",
        long = "router-broadcast-interval-secs",
        env,
        help = "seconds between rebroadcast batches [default: 60]"
    )]
    pub broadcast_interval_secs: Option<u64>,

    /// seconds between stale-channel prune passes
    #[arg(
        name = "ROUTER_PRUNE_INTERVAL_SECS",
        long = "router-prune-interval-secs",
        env,
        help = "seconds between stale-channel prune passes [default: 86400]"
    )]
    pub prune_interval_secs: Option<u64>,
}
