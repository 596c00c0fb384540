//! Bitcoin Core JSON-RPC access.

use bitcoin::BlockHash;
use brc721_support::rpc::Block;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

/// `RPC_INVALID_ADDRESS_OR_KEY`, returned for unknown block hashes.
pub const BLOCK_NOT_FOUND: i64 = -5;

/// `getblock` verbosity including prevouts.
const BLOCK_VERBOSITY: u8 = 3;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("rpc error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("rpc transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc response carries no result")]
    EmptyResult,
    #[error("rpc response decode: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RpcError {
    pub fn is_block_not_found(&self) -> bool {
        matches!(self, Self::Node { code, .. } if *code == BLOCK_NOT_FOUND)
    }
}

pub trait NodeClient {
    fn get_block(&self, hash: &BlockHash) -> impl Future<Output = Result<Block, RpcError>> + Send;
    fn get_block_hash(&self, height: u64) -> impl Future<Output = Result<BlockHash, RpcError>> + Send;
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct Response<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<ResponseError>,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    code: i64,
    message: String,
}

pub struct JsonRpcClient {
    client: reqwest::Client,
    config: RpcConfig,
}

impl JsonRpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "brc721",
            "method": method,
            "params": params,
        });
        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_ref());
        }

        // bitcoind reports RPC errors with non-2xx statuses, so the body is
        // decoded regardless of status.
        let text = request.send().await?.text().await?;
        decode_response(&text)
    }
}

fn decode_response<T: DeserializeOwned>(text: &str) -> Result<T, RpcError> {
    let response: Response<T> = serde_json::from_str(text)?;
    if let Some(error) = response.error {
        return Err(RpcError::Node {
            code: error.code,
            message: error.message,
        });
    }
    response.result.ok_or(RpcError::EmptyResult)
}

impl NodeClient for JsonRpcClient {
    async fn get_block(&self, hash: &BlockHash) -> Result<Block, RpcError> {
        self.call("getblock", json!([hash, BLOCK_VERBOSITY])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        self.call("getblockhash", json!([height])).await
    }
}
