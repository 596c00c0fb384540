use crate::envelope::TxInscription;
use crate::transfers::Transfer;
use sha2::{Digest, Sha256};

/// Hex SHA-256 over the comma-joined JSON of a block's extracted
/// inscriptions followed by its transfers.
pub fn block_checksum(
    inscriptions: &[TxInscription],
    transfers: &[Transfer],
) -> Result<String, serde_json::Error> {
    let mut parts = Vec::with_capacity(inscriptions.len() + transfers.len());
    for inscription in inscriptions {
        parts.push(serde_json::to_string(inscription)?);
    }
    for transfer in transfers {
        parts.push(serde_json::to_string(transfer)?);
    }
    Ok(sha256_hex(parts.join(",").as_bytes()))
}

/// Folds a block checksum into the running one.
pub fn chain(previous: &str, block: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.as_bytes());
    hasher.update(block.as_bytes());
    hex::encode(hasher.finalize())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
