//! Verbose block and transaction shapes returned by `getblock <hash> 3`.
//!
//! Only the fields the indexer reads are modelled. BTC-denominated values are
//! decoded straight into [`Amount`] so every downstream computation is
//! integer satoshi arithmetic.

use bitcoin::{Amount, BlockHash, OutPoint, Txid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: BlockHash,
    pub height: u64,
    #[serde(default, rename = "previousblockhash", skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<BlockHash>,
    #[serde(default, rename = "nextblockhash", skip_serializing_if = "Option::is_none")]
    pub next_block_hash: Option<BlockHash>,
    pub tx: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: Txid,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TxIn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    #[serde(default, rename = "txinwitness", skip_serializing_if = "Option::is_none")]
    pub witness: Option<Vec<String>>,
    /// Omitted by the node when block undo data is unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevout: Option<Prevout>,
}

impl TxIn {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some() || self.txid.is_none()
    }

    /// Outpoint this input spends; `None` for coinbase inputs.
    pub fn outpoint(&self) -> Option<OutPoint> {
        if self.coinbase.is_some() {
            return None;
        }
        Some(OutPoint::new(self.txid?, self.vout?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prevout {
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub height: u64,
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub value: Amount,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub value: Amount,
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
}

impl TxOut {
    pub fn address(&self) -> Option<&str> {
        self.script_pub_key.address.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptPubKey {
    /// Present only when the script has a well-defined address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}
