//! Inscription envelope extraction from witness data.
//!
//! Only the reveal script of the first input is inspected, and only one
//! inscription per transaction is recognised: the content push that follows
//! the last `OP_0` body separator of an `OP_FALSE OP_IF "ord" ... OP_ENDIF`
//! envelope.

use bitcoin::Txid;
use brc721_support::rpc::{Block, Transaction, TxOut};
use brc721_support::InscriptionId;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_ID: [u8; 3] = *b"ord";

const TAPROOT_ANNEX_PREFIX: &str = "50";
const OP_FALSE: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;

/// A transaction carrying an inscription, with the positional context the
/// verifier needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInscription {
    pub txid: Txid,
    /// Position of the transaction inside its block.
    pub index: usize,
    pub block_height: u64,
    pub inscription_index: u32,
    pub inscription_content: String,
    pub vout: Vec<TxOut>,
}

impl TxInscription {
    pub fn id(&self) -> InscriptionId {
        InscriptionId::new(self.txid, self.inscription_index)
    }

    /// Address of the first output, which receives the inscribed sat.
    pub fn owner_address(&self) -> Option<&str> {
        self.vout.first().and_then(TxOut::address)
    }
}

pub fn find_inscriptions_in_block(block: &Block) -> Vec<TxInscription> {
    block
        .tx
        .iter()
        .enumerate()
        .filter_map(|(index, tx)| {
            let inscription_content = find_inscription_in_tx(tx)?;
            Some(TxInscription {
                txid: tx.txid,
                index,
                block_height: block.height,
                // Multiple envelopes per transaction are not distinguished.
                inscription_index: 0,
                inscription_content,
                vout: tx.vout.clone(),
            })
        })
        .collect()
}

/// Returns the content of the inscription revealed by the first input, if any.
///
/// The script is the second-to-last witness item, or the last one when that
/// item starts with the annex prefix.
pub fn find_inscription_in_tx(tx: &Transaction) -> Option<String> {
    let witness = tx.vin.first()?.witness.as_deref()?;
    if witness.len() < 2 {
        return None;
    }

    let last = witness.last()?;
    let annex = last.starts_with(TAPROOT_ANNEX_PREFIX);
    if annex && witness.len() == 2 {
        return None;
    }

    let script_hex = if annex { last } else { &witness[witness.len() - 2] };
    let script = hex::decode(script_hex).ok()?;
    parse_envelope_content(&script)
}

/// Extracts the content push of an `ord` envelope from a raw tapscript.
///
/// Content may not contain `0x00`: the body separator is located by scanning
/// backwards for the last zero byte.
pub fn parse_envelope_content(script: &[u8]) -> Option<String> {
    let separator = script.iter().rposition(|&b| b == OP_FALSE)?;
    let envelope = script[..separator].iter().rposition(|&b| b == OP_FALSE)?;

    // OP_FALSE OP_IF OP_PUSHBYTES_3 "ord"
    if script.get(envelope + 3..envelope + 6)? != &PROTOCOL_ID[..] {
        return None;
    }

    let prefix = match *script.get(separator + 1)? {
        1..=75 => 0,
        OP_PUSHDATA1 => 1,
        OP_PUSHDATA2 => 2,
        OP_PUSHDATA4 => 4,
        _ => return None,
    };

    // Last byte is the envelope's OP_ENDIF.
    let content = script.get(separator + 2 + prefix..script.len() - 1)?;
    Some(String::from_utf8_lossy(content).into_owned())
}
