use std::{fs::File, io::BufReader, path::PathBuf};

use clap_serde_derive::{
    clap::{self, Parser},
    ClapSerde,
};
use home::home_dir;
use serde::Deserialize;

use crate::{ChainConfig, RouterConfig};

const DEFAULT_CONFIG_FILE_NAME: &str = "config.yml";

fn get_default_base_dir() -> PathBuf {
    let mut path = home_dir().expect("get home directory");
    path.push(".lumen-node");
    path
}

fn get_default_config_file() -> PathBuf {
    let mut path = get_default_base_dir();
    path.push(DEFAULT_CONFIG_FILE_NAME);
    path
}

// Config structs of the subsystems prefix their arg and env names
// (`chain-`/`CHAIN_`, `router-`/`ROUTER_`) so the flattened clap command
// stays collision free.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// config file
    #[arg(short, long = "config", help = format!("config file [default: {:?} or $BASE_DIR/config.yml]", get_default_config_file()))]
    config_file: Option<PathBuf>,

    /// base directory
    #[arg(short = 'd', long = "dir", help = format!("base directory for all [default: {:?}]", get_default_base_dir()))]
    base_dir: Option<PathBuf>,

    /// config for the chain watcher
    #[command(flatten)]
    pub chain: <ChainConfig as ClapSerde>::Opt,

    /// config for the gossip router
    #[command(flatten)]
    pub router: <RouterConfig as ClapSerde>::Opt,
}

#[derive(Deserialize)]
struct SerializedConfig {
    chain: Option<<ChainConfig as ClapSerde>::Opt>,
    router: Option<<RouterConfig as ClapSerde>::Opt>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chain: ChainConfig,
    pub router: RouterConfig,
    pub base_dir: PathBuf,
}

impl Config {
    /// Command line arguments take precedence over the config file, which
    /// takes precedence over the defaults.
    pub fn parse() -> Self {
        let mut args = Args::parse();
        let base_dir = args.base_dir.clone().unwrap_or_else(get_default_base_dir);
        let config_file = args
            .config_file
            .clone()
            .unwrap_or_else(|| base_dir.join(DEFAULT_CONFIG_FILE_NAME));

        let serialized = match File::open(&config_file) {
            Ok(file) => match serde_yaml::from_reader::<_, SerializedConfig>(BufReader::new(file))
            {
                Ok(config) => Some(config),
                Err(err) => panic!("Error in configuration file {:?}:\n{}", config_file, err),
            },
            Err(_) => None,
        };

        let (chain_from_file, router_from_file) = match serialized {
            Some(SerializedConfig { chain, router }) => (chain, router),
            None => (None, None),
        };
        let chain = match chain_from_file {
            Some(config) => ChainConfig::from(config).merge(&mut args.chain),
            None => ChainConfig::from(&mut args.chain),
        };
        let router = match router_from_file {
            Some(config) => RouterConfig::from(config).merge(&mut args.router),
            None => RouterConfig::from(&mut args.router),
        };

        Config {
            chain,
            router,
            base_dir,
        }
    }
}
