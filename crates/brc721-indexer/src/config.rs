use crate::rpc::RpcConfig;
use crate::store::State;
use bitcoin::BlockHash;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Chain {
    Mainnet,
    Testnet,
}

impl Chain {
    /// Where a fresh store starts walking: the block before the first
    /// BRC721 inscription on the network.
    pub fn genesis_state(self) -> Result<State, <BlockHash as FromStr>::Err> {
        let (hash, height, fallback_height) = match self {
            Self::Mainnet => (
                "00000000000000000001de804f036647861c819b404a78bf0246eb104e0e0987",
                789_817,
                789_890,
            ),
            Self::Testnet => (
                "0000000000000005d160ce5f37790eeea8f12a1370a85ef24ced6ee454a1ef35",
                2_437_791,
                2_437_791,
            ),
        };
        Ok(State {
            run: 1,
            hash: hash.parse()?,
            height,
            fallback_height,
            checksum: String::new(),
        })
    }

    fn default_rpc_port(self) -> u16 {
        match self {
            Self::Mainnet => 8332,
            Self::Testnet => 18332,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "brc721-indexer", version, about = "BRC721 inscription indexer")]
pub struct Config {
    /// Full node RPC endpoint; built from --rpc-host and --rpc-port when unset
    #[arg(long, env = "BRC721_RPC_URL")]
    pub rpc_url: Option<String>,

    #[arg(long, env = "RPCBINDIP", default_value = "127.0.0.1")]
    pub rpc_host: String,

    /// Defaults to the network's standard RPC port
    #[arg(long, env = "RPCPORT")]
    pub rpc_port: Option<u16>,

    #[arg(long, env = "RPCUSER")]
    pub rpc_user: Option<String>,

    #[arg(long, env = "RPCPASSWORD", hide_env_values = true)]
    pub rpc_password: Option<String>,

    #[arg(long, default_value_t = 30)]
    pub rpc_timeout_secs: u64,

    #[arg(long, env = "NETWORK", value_enum, default_value_t = Chain::Mainnet)]
    pub network: Chain,

    /// redb database file
    #[arg(long, env = "BRC721_DATA", default_value = "brc721.redb")]
    pub data_path: PathBuf,

    /// Delay between checks for a new tip
    #[arg(long, default_value_t = 30)]
    pub poll_interval_secs: u64,

    /// Flag every manifest as stale and walk again from the network's first block
    #[arg(long)]
    pub reindex: bool,
}

impl Config {
    pub fn rpc_config(&self) -> RpcConfig {
        let url = self.rpc_url.clone().unwrap_or_else(|| {
            let port = self
                .rpc_port
                .unwrap_or_else(|| self.network.default_rpc_port());
            format!("http://{}:{}", self.rpc_host, port)
        });
        RpcConfig {
            url,
            user: self.rpc_user.clone(),
            password: self.rpc_password.clone(),
            timeout: Duration::from_secs(self.rpc_timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
