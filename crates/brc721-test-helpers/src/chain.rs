use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, OutPoint, Txid};
use brc721_indexer::envelope::TxInscription;
use brc721_indexer::rpc::{NodeClient, RpcError, BLOCK_NOT_FOUND};
use brc721_indexer::RedbStore;
use brc721_support::rpc::{Block, Prevout, ScriptPubKey, Transaction, TxIn, TxOut};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Value of the output an inscription is revealed into.
pub const POSTAGE: u64 = 10_000;

/// Deterministic txid distinct for every `n`.
pub fn txid(n: u64) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    bytes[31] = 0x7c;
    Txid::from_byte_array(bytes)
}

pub fn block_hash(height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0xb1;
    BlockHash::from_byte_array(bytes)
}

pub fn create_output(n: u32, sats: u64, address: Option<&str>) -> TxOut {
    TxOut {
        value: Amount::from_sat(sats),
        n,
        script_pub_key: ScriptPubKey {
            address: address.map(str::to_owned),
        },
    }
}

/// Builder for verbose (`getblock` verbosity 3) transactions.
#[derive(Debug, Clone)]
pub struct TxBuilder {
    tx: Transaction,
}

impl TxBuilder {
    pub fn new(txid: Txid) -> Self {
        Self {
            tx: Transaction {
                txid,
                vin: Vec::new(),
                vout: Vec::new(),
            },
        }
    }

    pub fn coinbase(mut self) -> Self {
        self.tx.vin.push(TxIn {
            coinbase: Some("03a0bb0d".into()),
            ..Default::default()
        });
        self
    }

    /// Spends `outpoint`, which held `sats`.
    pub fn spend(mut self, outpoint: OutPoint, sats: u64) -> Self {
        self.tx.vin.push(TxIn {
            txid: Some(outpoint.txid),
            vout: Some(outpoint.vout),
            prevout: Some(Prevout {
                generated: false,
                height: 0,
                value: Amount::from_sat(sats),
                script_pub_key: ScriptPubKey::default(),
            }),
            ..Default::default()
        });
        self
    }

    /// Spends `outpoint` as a node without undo data reports it.
    pub fn spend_without_prevout(mut self, outpoint: OutPoint) -> Self {
        self.tx.vin.push(TxIn {
            txid: Some(outpoint.txid),
            vout: Some(outpoint.vout),
            ..Default::default()
        });
        self
    }

    pub fn output(mut self, sats: u64, address: Option<&str>) -> Self {
        let n = self.tx.vout.len() as u32;
        self.tx.vout.push(create_output(n, sats, address));
        self
    }

    /// Reveals `content` through the first input's witness.
    ///
    /// A `PUSHDATA2` length with a zero low byte would be taken for the body
    /// separator, so such content gets one byte of trailing whitespace.
    pub fn inscribe(mut self, content: &str) -> Self {
        if self.tx.vin.is_empty() {
            let funding = OutPoint::new(txid(u64::MAX), 0);
            self = self.spend(funding, POSTAGE);
        }
        let mut content = content.to_owned();
        if content.len() > 255 && content.len() % 256 == 0 {
            content.push(' ');
        }
        self.tx.vin[0].witness = Some(create_reveal_witness(content.as_bytes()));
        self
    }

    pub fn build(self) -> Transaction {
        self.tx
    }
}

pub fn create_coinbase_tx(txid: Txid) -> Transaction {
    TxBuilder::new(txid)
        .coinbase()
        .output(625_000_000, Some("bc1qminer"))
        .build()
}

/// Reveal of `payload` into a single [`POSTAGE`] output owned by
/// [`crate::OWNER_ADDRESS`].
pub fn create_inscription_tx(txid: Txid, payload: &Value) -> Transaction {
    TxBuilder::new(txid)
        .inscribe(&payload.to_string())
        .output(POSTAGE, Some(crate::OWNER_ADDRESS))
        .build()
}

/// `OP_FALSE OP_IF "ord" 1 "application/json" 0 <content> OP_ENDIF` behind
/// a key-path check.
pub fn create_envelope_script(content: &[u8]) -> Vec<u8> {
    let mut script = vec![0x20];
    script.extend_from_slice(&[0x5a; 32]);
    script.push(0xac);
    script.extend_from_slice(&[0x00, 0x63, 0x03]);
    script.extend_from_slice(b"ord");
    script.extend_from_slice(&[0x01, 0x01, 0x10]);
    script.extend_from_slice(b"application/json");
    script.push(0x00);
    match content.len() {
        len @ 1..=75 => script.push(len as u8),
        len @ 76..=255 => script.extend_from_slice(&[0x4c, len as u8]),
        len => {
            script.push(0x4d);
            script.extend_from_slice(&(len as u16).to_le_bytes());
        }
    }
    script.extend_from_slice(content);
    script.push(0x68);
    script
}

/// Signature, tapscript and control block, hex encoded.
pub fn create_reveal_witness(content: &[u8]) -> Vec<String> {
    vec![
        hex::encode([0x30; 64]),
        hex::encode(create_envelope_script(content)),
        hex::encode([0xc0; 33]),
    ]
}

/// Links `txs` into consecutive blocks starting at `start_height`.
pub fn create_chain(start_height: u64, txs: Vec<Vec<Transaction>>) -> Vec<Block> {
    let count = txs.len() as u64;
    txs.into_iter()
        .enumerate()
        .map(|(i, tx)| {
            let height = start_height + i as u64;
            Block {
                hash: block_hash(height),
                height,
                previous_block_hash: Some(block_hash(height.saturating_sub(1))),
                next_block_hash: (i as u64 + 1 < count).then(|| block_hash(height + 1)),
                tx,
            }
        })
        .collect()
}

pub fn create_tx_inscription(txid: Txid, block_height: u64, content: &Value) -> TxInscription {
    TxInscription {
        txid,
        index: 1,
        block_height,
        inscription_index: 0,
        inscription_content: content.to_string(),
        vout: vec![create_output(0, POSTAGE, Some(crate::OWNER_ADDRESS))],
    }
}

/// Empty store on redb's in-memory backend.
pub fn create_store() -> RedbStore {
    RedbStore::in_memory().expect("in-memory redb store")
}

/// In-memory node answering `getblock` / `getblockhash` from known blocks.
#[derive(Debug, Default)]
pub struct MockNode {
    blocks: Mutex<HashMap<BlockHash, Block>>,
    heights: Mutex<BTreeMap<u64, BlockHash>>,
    requests: Mutex<Vec<String>>,
}

impl MockNode {
    pub fn with_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let node = Self::default();
        for block in blocks {
            node.insert(block);
        }
        node
    }

    /// Adds `block` and makes it the active block at its height.
    pub fn insert(&self, block: Block) {
        self.heights
            .lock()
            .unwrap()
            .insert(block.height, block.hash);
        self.blocks.lock().unwrap().insert(block.hash, block);
    }

    /// Forgets `hash`, as after a reorg.
    pub fn remove(&self, hash: &BlockHash) -> Option<Block> {
        let block = self.blocks.lock().unwrap().remove(hash)?;
        let mut heights = self.heights.lock().unwrap();
        if heights.get(&block.height) == Some(hash) {
            heights.remove(&block.height);
        }
        Some(block)
    }

    /// Points `height` at `hash` without serving a block for it.
    pub fn set_height(&self, height: u64, hash: BlockHash) {
        self.heights.lock().unwrap().insert(height, hash);
    }

    pub fn set_next(&self, hash: &BlockHash, next: Option<BlockHash>) {
        if let Some(block) = self.blocks.lock().unwrap().get_mut(hash) {
            block.next_block_hash = next;
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl NodeClient for MockNode {
    async fn get_block(&self, hash: &BlockHash) -> Result<Block, RpcError> {
        self.requests.lock().unwrap().push(format!("getblock {hash}"));
        self.blocks
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| RpcError::Node {
                code: BLOCK_NOT_FOUND,
                message: "Block not found".into(),
            })
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("getblockhash {height}"));
        self.heights
            .lock()
            .unwrap()
            .get(&height)
            .copied()
            .ok_or_else(|| RpcError::Node {
                code: -8,
                message: "Block height out of range".into(),
            })
    }
}
