use bitcoin::{OutPoint, Txid};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for an inscription: the revealing transaction and the
/// envelope's index inside it, rendered as `<txid>i<index>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InscriptionId {
    pub txid: Txid,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseInscriptionIdError {
    #[error("missing `i` separator")]
    Separator,
    #[error("invalid txid: {0}")]
    Txid(String),
    #[error("invalid index: {0}")]
    Index(#[from] std::num::ParseIntError),
}

impl InscriptionId {
    pub fn new(txid: Txid, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for InscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}i{}", self.txid, self.index)
    }
}

impl FromStr for InscriptionId {
    type Err = ParseInscriptionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, index) = s
            .split_once('i')
            .ok_or(ParseInscriptionIdError::Separator)?;
        let txid = Txid::from_str(txid)
            .map_err(|e| ParseInscriptionIdError::Txid(e.to_string()))?;
        Ok(Self {
            txid,
            index: index.parse()?,
        })
    }
}

impl Serialize for InscriptionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InscriptionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Location of an inscribed satoshi within a UTXO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SatPoint {
    pub outpoint: OutPoint,
    pub offset: u64,
}

impl SatPoint {
    pub fn new(outpoint: OutPoint, offset: u64) -> Self {
        Self { outpoint, offset }
    }
}

impl fmt::Display for SatPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.outpoint.txid, self.outpoint.vout, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "f6fadfe24145d9eefbf2390401afa0b88ace8bfd0cd7c1715d650e5646b0a66c";

    #[test]
    fn test_inscription_id_display_and_parse() {
        let id: InscriptionId = format!("{TXID}i0").parse().unwrap();
        assert_eq!(id.txid.to_string(), TXID);
        assert_eq!(id.index, 0);
        assert_eq!(id.to_string(), format!("{TXID}i0"));
    }

    #[test]
    fn test_inscription_id_rejects_garbage() {
        assert_eq!(
            "1".parse::<InscriptionId>(),
            Err(ParseInscriptionIdError::Separator)
        );
        assert!(matches!(
            "abci0".parse::<InscriptionId>(),
            Err(ParseInscriptionIdError::Txid(_))
        ));
        assert!(matches!(
            format!("{TXID}ix").parse::<InscriptionId>(),
            Err(ParseInscriptionIdError::Index(_))
        ));
    }

    #[test]
    fn test_inscription_id_serde_is_string() {
        let id = InscriptionId::new(TXID.parse().unwrap(), 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{TXID}i3\""));
        let restored: InscriptionId = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, id);

        let bytes = bincode::serialize(&id).unwrap();
        assert_eq!(bincode::deserialize::<InscriptionId>(&bytes).unwrap(), id);
    }

    #[test]
    fn test_satpoint_display() {
        let outpoint = OutPoint::new(TXID.parse().unwrap(), 1);
        assert_eq!(
            SatPoint::new(outpoint, 12345).to_string(),
            format!("{TXID}:1:12345")
        );
    }
}
