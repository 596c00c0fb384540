//! Satpoint tracking across spends.
//!
//! Inputs are laid end to end in order, outputs likewise, and each inscribed
//! sat keeps its absolute position in that sequence: it lands in the output
//! covering that position, or becomes unbound when the outputs run out
//! before it (spent as fee).

use crate::error::{IndexerError, Result};
use crate::store::{InscriptionLocator, SatPointRecord, Store};
use bitcoin::{OutPoint, Txid};
use brc721_support::rpc::{Transaction, TxOut};
use brc721_support::{InscriptionId, SatPoint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transfer {
    #[serde(rename_all = "camelCase")]
    Normal {
        inscription_id: InscriptionId,
        tx_id: Txid,
        vout: u32,
        offset: u64,
        owner_address: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Unbound { inscription_id: InscriptionId },
}

impl Transfer {
    pub fn inscription_id(&self) -> &InscriptionId {
        match self {
            Self::Normal { inscription_id, .. } | Self::Unbound { inscription_id } => inscription_id,
        }
    }

    pub fn satpoint(&self) -> Option<SatPoint> {
        match self {
            Self::Normal {
                tx_id, vout, offset, ..
            } => Some(SatPoint::new(OutPoint::new(*tx_id, *vout), *offset)),
            Self::Unbound { .. } => None,
        }
    }
}

/// Computes where every inscription resting on `tx`'s inputs moves to.
pub fn find_transfers<L: InscriptionLocator + ?Sized>(
    locator: &L,
    tx: &Transaction,
) -> Result<Vec<Transfer>> {
    let inputs = tx
        .vin
        .iter()
        .enumerate()
        .filter(|(_, input)| !input.is_coinbase())
        .map(|(input, txin)| match (txin.outpoint(), &txin.prevout) {
            (Some(outpoint), Some(prevout)) => Ok((outpoint, prevout.value.to_sat())),
            _ => Err(IndexerError::UndoData {
                txid: tx.txid,
                input,
            }),
        })
        .collect::<Result<Vec<_>>>()?;

    let mut transfers = Vec::new();
    let mut input_value = 0u64;
    let mut unbound = false;

    for (outpoint, value) in inputs {
        let mut resting = locator.inscriptions_on_outpoint(&outpoint)?;
        resting.sort_by_key(|(_, offset)| *offset);

        for (inscription_id, offset) in resting {
            let located = if unbound {
                None
            } else {
                locate(&tx.vout, input_value + offset)
            };
            match located {
                Some((vout, offset)) => transfers.push(Transfer::Normal {
                    inscription_id,
                    tx_id: tx.txid,
                    vout: vout as u32,
                    offset,
                    owner_address: tx.vout[vout].address().map(str::to_owned),
                }),
                None => {
                    unbound = true;
                    transfers.push(Transfer::Unbound { inscription_id });
                }
            }
        }

        input_value += value;
    }

    Ok(transfers)
}

/// Finds the output covering absolute position `offset`, and the offset
/// inside it.
fn locate(outputs: &[TxOut], mut offset: u64) -> Option<(usize, u64)> {
    for (vout, output) in outputs.iter().enumerate() {
        let value = output.value.to_sat();
        if value > offset {
            return Some((vout, offset));
        }
        offset -= value;
    }
    None
}

pub fn apply_transfers<S: Store + ?Sized>(
    store: &mut S,
    transfers: &[Transfer],
    block_height: u64,
) -> Result<()> {
    for transfer in transfers {
        let id = *transfer.inscription_id();
        let mut manifest = store
            .inscription(&id)?
            .ok_or(IndexerError::UnknownInscription(id))?;

        match (transfer, transfer.satpoint()) {
            (Transfer::Normal { owner_address, .. }, Some(satpoint)) => {
                manifest.satpoint = Some(satpoint);
                manifest.owner_address = owner_address.clone();
                store.upsert_inscription(manifest)?;
                store.upsert_satpoint(
                    &id,
                    SatPointRecord::located(satpoint, owner_address.clone(), block_height),
                )?;
            }
            _ => {
                manifest.satpoint = None;
                manifest.owner_address = None;
                store.upsert_inscription(manifest)?;
                store.append_satpoint(&id, SatPointRecord::unbound(block_height))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Amount;
    use brc721_support::rpc::ScriptPubKey;

    fn outputs(values: &[u64]) -> Vec<TxOut> {
        values
            .iter()
            .enumerate()
            .map(|(n, value)| TxOut {
                value: Amount::from_sat(*value),
                n: n as u32,
                script_pub_key: ScriptPubKey::default(),
            })
            .collect()
    }

    #[test]
    fn test_locate_walks_outputs() {
        let outputs = outputs(&[10, 5]);
        assert_eq!(locate(&outputs, 0), Some((0, 0)));
        assert_eq!(locate(&outputs, 9), Some((0, 9)));
        assert_eq!(locate(&outputs, 10), Some((1, 0)));
        assert_eq!(locate(&outputs, 14), Some((1, 4)));
        assert_eq!(locate(&outputs, 15), None);
        assert_eq!(locate(&[], 0), None);
    }

    #[test]
    fn test_zero_value_outputs_hold_nothing() {
        let outputs = outputs(&[0, 3]);
        assert_eq!(locate(&outputs, 0), Some((1, 0)));
    }

    #[test]
    fn test_transfer_json_shape() {
        let id: InscriptionId = "f6fadfe24145d9eefbf2390401afa0b88ace8bfd0cd7c1715d650e5646b0a66ci0"
            .parse()
            .unwrap();
        let json = serde_json::to_value(Transfer::Unbound { inscription_id: id }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "unbound", "inscriptionId": id.to_string() })
        );

        let normal = Transfer::Normal {
            inscription_id: id,
            tx_id: id.txid,
            vout: 1,
            offset: 2,
            owner_address: None,
        };
        let json = serde_json::to_value(&normal).unwrap();
        assert_eq!(json["type"], "normal");
        assert_eq!(json["txId"], id.txid.to_string());
        assert_eq!(normal.satpoint(), Some(SatPoint::new(OutPoint::new(id.txid, 1), 2)));
    }
}
