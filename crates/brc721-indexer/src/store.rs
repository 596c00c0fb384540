//! Persistent records and the storage seam the indexer writes through.
//!
//! Every write is an upsert keyed by inscription id (or block height for
//! checksums), so re-processing a block converges on the same rows.

use crate::error::VerificationError;
use bitcoin::{BlockHash, OutPoint, Txid};
use brc721_support::{InscriptionId, SatPoint};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("database: {0}")]
    Database(#[from] redb::Error),
    #[error("record encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("store has no open transaction")]
    Closed,
}

macro_rules! from_redb_error {
    ($($error:ty),* $(,)?) => {
        $(
            impl From<$error> for StoreError {
                fn from(err: $error) -> Self {
                    Self::Database(err.into())
                }
            }
        )*
    };
}

from_redb_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Progress marker of the block walk. A single row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub run: u64,
    /// Last fully processed block.
    pub hash: BlockHash,
    pub height: u64,
    /// Height to resume from when `hash` drops off the active chain.
    pub fallback_height: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub id: InscriptionId,
    pub raw: String,
    pub version: String,
    pub name: String,
    pub symbol: String,
    pub position: u64,
    pub max_supply: Option<u64>,
    pub max_per_address: Option<u64>,
    pub max_block_height: Option<u64>,
    pub payment_address: String,
    pub signer_public_key: String,
    pub inscriber_address: String,
    pub block_height: u64,
    pub transaction_index: usize,
    pub reindexing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InscriptionManifest {
    pub id: InscriptionId,
    pub collection_id: InscriptionId,
    pub raw: String,
    pub version: String,
    pub valid: bool,
    pub verification_errors: Vec<VerificationError>,
    /// Rank among the collection's valid inscriptions; `None` when invalid.
    pub position: Option<u64>,
    pub price: Option<u64>,
    pub initial_owner_address: Option<String>,
    pub inscriber_address: String,
    /// Current location of the inscribed sat; `None` once unbound.
    pub satpoint: Option<SatPoint>,
    pub owner_address: Option<String>,
    pub block_height: u64,
    pub transaction_index: usize,
    pub reindexing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealManifest {
    pub id: InscriptionId,
    pub collection_id: InscriptionId,
    pub raw: String,
    pub version: String,
    pub valid: bool,
    pub verification_errors: Vec<VerificationError>,
    pub weight: i64,
    pub metadata_url: String,
    pub inscriber_address: String,
    pub block_height: u64,
    pub transaction_index: usize,
    pub reindexing: bool,
}

/// One row of an inscription's location history. All location fields are
/// `None` for an unbound row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatPointRecord {
    pub tx_id: Option<Txid>,
    pub vout: Option<u32>,
    pub offset: Option<u64>,
    pub owner_address: Option<String>,
    pub block_height: u64,
}

impl SatPointRecord {
    pub fn located(satpoint: SatPoint, owner_address: Option<String>, block_height: u64) -> Self {
        Self {
            tx_id: Some(satpoint.outpoint.txid),
            vout: Some(satpoint.outpoint.vout),
            offset: Some(satpoint.offset),
            owner_address,
            block_height,
        }
    }

    pub fn unbound(block_height: u64) -> Self {
        Self {
            tx_id: None,
            vout: None,
            offset: None,
            owner_address: None,
            block_height,
        }
    }

    pub fn satpoint(&self) -> Option<SatPoint> {
        Some(SatPoint::new(
            OutPoint::new(self.tx_id?, self.vout?),
            self.offset?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub block_height: u64,
    pub block_hash: BlockHash,
    pub checksum: String,
}

/// Lookup the transfer tracker needs: valid inscriptions currently resting
/// on an outpoint, with their offsets inside it.
pub trait InscriptionLocator {
    fn inscriptions_on_outpoint(&self, outpoint: &OutPoint) -> StoreResult<Vec<(InscriptionId, u64)>>;
}

pub trait Store: InscriptionLocator {
    fn state(&self) -> StoreResult<Option<State>>;
    fn put_state(&mut self, state: State) -> StoreResult<()>;
    /// Inserts `initial` when no state exists, otherwise increments `run`.
    fn begin_run(&mut self, initial: State) -> StoreResult<State>;

    fn collection(&self, id: &InscriptionId) -> StoreResult<Option<CollectionManifest>>;
    /// Collections other than `excluding` that are not awaiting reindex.
    fn count_collections(&self, excluding: &InscriptionId) -> StoreResult<u64>;
    fn upsert_collection(&mut self, manifest: CollectionManifest) -> StoreResult<()>;

    fn inscription(&self, id: &InscriptionId) -> StoreResult<Option<InscriptionManifest>>;
    /// Valid, non-reindexing inscriptions of `collection` other than
    /// `excluding`, optionally restricted to one inscriber address.
    fn count_valid_inscriptions(
        &self,
        collection: &InscriptionId,
        inscriber: Option<&str>,
        excluding: &InscriptionId,
    ) -> StoreResult<u64>;
    fn upsert_inscription(&mut self, manifest: InscriptionManifest) -> StoreResult<()>;

    fn reveal(&self, id: &InscriptionId) -> StoreResult<Option<RevealManifest>>;
    fn reveals(&self, collection: &InscriptionId) -> StoreResult<Vec<RevealManifest>>;
    fn upsert_reveal(&mut self, manifest: RevealManifest) -> StoreResult<()>;

    fn satpoint_history(&self, id: &InscriptionId) -> StoreResult<Vec<SatPointRecord>>;
    /// Keyed on `(id, tx_id, vout, offset)`; an existing row gets the new
    /// owner and height.
    fn upsert_satpoint(&mut self, id: &InscriptionId, record: SatPointRecord) -> StoreResult<()>;
    fn append_satpoint(&mut self, id: &InscriptionId, record: SatPointRecord) -> StoreResult<()>;

    fn checksum(&self, block_height: u64) -> StoreResult<Option<ChecksumRecord>>;
    fn put_checksum(&mut self, record: ChecksumRecord) -> StoreResult<()>;

    /// Flags every manifest as stale until it is upserted again.
    fn mark_reindexing(&mut self) -> StoreResult<()>;

    /// Makes every write since the last commit durable.
    fn commit(&mut self) -> StoreResult<()>;
}
