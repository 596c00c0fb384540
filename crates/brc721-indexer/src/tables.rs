//! redb-backed store.
//!
//! Every table is opened through one write transaction that stays open until
//! `commit`, so reads observe the block being indexed and a block either
//! lands whole or not at all. Manifests and history rows are bincode
//! encoded. Positions and limits read the `COUNTERS` table instead of
//! scanning manifests.

use crate::store::{
    ChecksumRecord, CollectionManifest, InscriptionLocator, InscriptionManifest, RevealManifest,
    SatPointRecord, State, Store, StoreError, StoreResult,
};
use bitcoin::OutPoint;
use brc721_support::InscriptionId;
use redb::backends::InMemoryBackend;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Bincode records keyed by a string id.
type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

const STATE: RecordTable = TableDefinition::new("state");
const COLLECTIONS: RecordTable = TableDefinition::new("collections");
const INSCRIPTIONS: RecordTable = TableDefinition::new("inscriptions");
const REVEALS: RecordTable = TableDefinition::new("reveals");
const SATPOINTS: RecordTable = TableDefinition::new("satpoints");
const CHECKSUMS: TableDefinition<u64, &[u8]> = TableDefinition::new("checksums");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

// "<txid>:<vout>" -> inscription id
const OUTPOINT_TO_INSCRIPTIONS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("outpoint_to_inscriptions");
// collection id -> reveal id
const COLLECTION_TO_REVEALS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("collection_to_reveals");

const STATE_KEY: &str = "state";
const COLLECTION_COUNT: &str = "collections";

fn valid_inscriptions_key(collection: &InscriptionId, inscriber: Option<&str>) -> String {
    match inscriber {
        Some(address) => format!("valid:{collection}:{address}"),
        None => format!("valid:{collection}"),
    }
}

/// Counter keys an inscription contributes to while it is valid.
fn inscription_counters(manifest: &InscriptionManifest) -> Option<[String; 2]> {
    (manifest.valid && !manifest.reindexing).then(|| {
        [
            valid_inscriptions_key(&manifest.collection_id, None),
            valid_inscriptions_key(&manifest.collection_id, Some(&manifest.inscriber_address)),
        ]
    })
}

fn get_record<T: DeserializeOwned>(
    tx: &WriteTransaction,
    definition: RecordTable,
    key: &str,
) -> StoreResult<Option<T>> {
    let table = tx.open_table(definition)?;
    let record = match table.get(key)? {
        Some(bytes) => Some(bincode::deserialize(bytes.value())?),
        None => None,
    };
    Ok(record)
}

fn put_record<T: Serialize>(
    tx: &WriteTransaction,
    definition: RecordTable,
    key: &str,
    record: &T,
) -> StoreResult<()> {
    let bytes = bincode::serialize(record)?;
    tx.open_table(definition)?.insert(key, bytes.as_slice())?;
    Ok(())
}

fn counter(tx: &WriteTransaction, key: &str) -> StoreResult<u64> {
    let table = tx.open_table(COUNTERS)?;
    let count = table.get(key)?.map(|count| count.value()).unwrap_or(0);
    Ok(count)
}

fn bump_counter(tx: &WriteTransaction, key: &str, up: bool) -> StoreResult<()> {
    let mut table = tx.open_table(COUNTERS)?;
    let current = table.get(key)?.map(|count| count.value()).unwrap_or(0);
    let next = if up { current + 1 } else { current.saturating_sub(1) };
    if next == 0 {
        table.remove(key)?;
    } else {
        table.insert(key, next)?;
    }
    Ok(())
}

/// Rewrites every record of `definition` through `mark`.
fn mark_all<T: Serialize + DeserializeOwned>(
    tx: &WriteTransaction,
    definition: RecordTable,
    mark: impl Fn(&mut T),
) -> StoreResult<usize> {
    let mut records = Vec::new();
    {
        let table = tx.open_table(definition)?;
        for entry in table.iter()? {
            let (key, bytes) = entry?;
            let mut record: T = bincode::deserialize(bytes.value())?;
            mark(&mut record);
            records.push((key.value().to_owned(), bincode::serialize(&record)?));
        }
    }

    let mut table = tx.open_table(definition)?;
    for (key, bytes) in &records {
        table.insert(key.as_str(), bytes.as_slice())?;
    }
    Ok(records.len())
}

pub struct RedbStore {
    /// Open until `commit`, then replaced by a fresh one.
    tx: Option<WriteTransaction>,
    db: Database,
    path: Option<PathBuf>,
}

impl RedbStore {
    /// Opens or creates the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&path)?;
        let shown = path.display().to_string();
        let store = Self::init(db, Some(path))?;

        let tx = store.tx()?;
        log::info!(
            "opened store at {shown} ({} collections, {} inscriptions, {} reveals)",
            tx.open_table(COLLECTIONS)?.len()?,
            tx.open_table(INSCRIPTIONS)?.len()?,
            tx.open_table(REVEALS)?.len()?
        );
        Ok(store)
    }

    /// A store that lives and dies with the process.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db, None)
    }

    fn init(db: Database, path: Option<PathBuf>) -> StoreResult<Self> {
        let tx = db.begin_write()?;
        tx.open_table(STATE)?;
        tx.open_table(COLLECTIONS)?;
        tx.open_table(INSCRIPTIONS)?;
        tx.open_table(REVEALS)?;
        tx.open_table(SATPOINTS)?;
        tx.open_table(CHECKSUMS)?;
        tx.open_table(COUNTERS)?;
        tx.open_multimap_table(OUTPOINT_TO_INSCRIPTIONS)?;
        tx.open_multimap_table(COLLECTION_TO_REVEALS)?;

        let mut store = Self {
            tx: Some(tx),
            db,
            path,
        };
        store.commit()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn tx(&self) -> StoreResult<&WriteTransaction> {
        self.tx.as_ref().ok_or(StoreError::Closed)
    }

    fn index_outpoint(
        tx: &WriteTransaction,
        manifest: &InscriptionManifest,
        insert: bool,
    ) -> StoreResult<()> {
        let Some(satpoint) = manifest.satpoint else {
            return Ok(());
        };
        let outpoint = satpoint.outpoint.to_string();
        let id = manifest.id.to_string();
        let mut table = tx.open_multimap_table(OUTPOINT_TO_INSCRIPTIONS)?;
        if insert {
            table.insert(outpoint.as_str(), id.as_str())?;
        } else {
            table.remove(outpoint.as_str(), id.as_str())?;
        }
        Ok(())
    }
}

impl InscriptionLocator for RedbStore {
    fn inscriptions_on_outpoint(&self, outpoint: &OutPoint) -> StoreResult<Vec<(InscriptionId, u64)>> {
        let tx = self.tx()?;
        let mut ids = Vec::new();
        {
            let table = tx.open_multimap_table(OUTPOINT_TO_INSCRIPTIONS)?;
            for id in table.get(outpoint.to_string().as_str())? {
                ids.push(id?.value().to_owned());
            }
        }

        let mut resting = Vec::new();
        for id in ids {
            let Some(manifest) = get_record::<InscriptionManifest>(tx, INSCRIPTIONS, &id)? else {
                continue;
            };
            if !manifest.valid || manifest.reindexing {
                continue;
            }
            if let Some(satpoint) = manifest.satpoint {
                resting.push((manifest.id, satpoint.offset));
            }
        }
        Ok(resting)
    }
}

impl Store for RedbStore {
    fn state(&self) -> StoreResult<Option<State>> {
        get_record(self.tx()?, STATE, STATE_KEY)
    }

    fn put_state(&mut self, state: State) -> StoreResult<()> {
        put_record(self.tx()?, STATE, STATE_KEY, &state)
    }

    fn begin_run(&mut self, initial: State) -> StoreResult<State> {
        let state = match self.state()? {
            Some(state) => State {
                run: state.run + 1,
                ..state
            },
            None => initial,
        };
        self.put_state(state.clone())?;
        Ok(state)
    }

    fn collection(&self, id: &InscriptionId) -> StoreResult<Option<CollectionManifest>> {
        get_record(self.tx()?, COLLECTIONS, &id.to_string())
    }

    fn count_collections(&self, excluding: &InscriptionId) -> StoreResult<u64> {
        let count = counter(self.tx()?, COLLECTION_COUNT)?;
        let counted = self
            .collection(excluding)?
            .is_some_and(|collection| !collection.reindexing);
        Ok(count - u64::from(counted && count > 0))
    }

    fn upsert_collection(&mut self, manifest: CollectionManifest) -> StoreResult<()> {
        let tx = self.tx()?;
        let key = manifest.id.to_string();
        let previous: Option<CollectionManifest> = get_record(tx, COLLECTIONS, &key)?;
        let was_counted = previous.is_some_and(|previous| !previous.reindexing);
        if was_counted != !manifest.reindexing {
            bump_counter(tx, COLLECTION_COUNT, !manifest.reindexing)?;
        }
        put_record(tx, COLLECTIONS, &key, &manifest)
    }

    fn inscription(&self, id: &InscriptionId) -> StoreResult<Option<InscriptionManifest>> {
        get_record(self.tx()?, INSCRIPTIONS, &id.to_string())
    }

    fn count_valid_inscriptions(
        &self,
        collection: &InscriptionId,
        inscriber: Option<&str>,
        excluding: &InscriptionId,
    ) -> StoreResult<u64> {
        let count = counter(self.tx()?, &valid_inscriptions_key(collection, inscriber))?;
        let counted = self.inscription(excluding)?.is_some_and(|manifest| {
            inscription_counters(&manifest).is_some()
                && manifest.collection_id == *collection
                && inscriber.map_or(true, |address| manifest.inscriber_address == address)
        });
        Ok(count - u64::from(counted && count > 0))
    }

    fn upsert_inscription(&mut self, manifest: InscriptionManifest) -> StoreResult<()> {
        let tx = self.tx()?;
        let key = manifest.id.to_string();
        if let Some(previous) = get_record::<InscriptionManifest>(tx, INSCRIPTIONS, &key)? {
            for counter_key in inscription_counters(&previous).into_iter().flatten() {
                bump_counter(tx, &counter_key, false)?;
            }
            Self::index_outpoint(tx, &previous, false)?;
        }
        for counter_key in inscription_counters(&manifest).into_iter().flatten() {
            bump_counter(tx, &counter_key, true)?;
        }
        Self::index_outpoint(tx, &manifest, true)?;
        put_record(tx, INSCRIPTIONS, &key, &manifest)
    }

    fn reveal(&self, id: &InscriptionId) -> StoreResult<Option<RevealManifest>> {
        get_record(self.tx()?, REVEALS, &id.to_string())
    }

    fn reveals(&self, collection: &InscriptionId) -> StoreResult<Vec<RevealManifest>> {
        let tx = self.tx()?;
        let mut ids = Vec::new();
        {
            let table = tx.open_multimap_table(COLLECTION_TO_REVEALS)?;
            for id in table.get(collection.to_string().as_str())? {
                ids.push(id?.value().to_owned());
            }
        }

        let mut reveals = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(reveal) = get_record(tx, REVEALS, &id)? {
                reveals.push(reveal);
            }
        }
        Ok(reveals)
    }

    fn upsert_reveal(&mut self, manifest: RevealManifest) -> StoreResult<()> {
        let tx = self.tx()?;
        let key = manifest.id.to_string();
        tx.open_multimap_table(COLLECTION_TO_REVEALS)?
            .insert(manifest.collection_id.to_string().as_str(), key.as_str())?;
        put_record(tx, REVEALS, &key, &manifest)
    }

    fn satpoint_history(&self, id: &InscriptionId) -> StoreResult<Vec<SatPointRecord>> {
        Ok(get_record(self.tx()?, SATPOINTS, &id.to_string())?.unwrap_or_default())
    }

    fn upsert_satpoint(&mut self, id: &InscriptionId, record: SatPointRecord) -> StoreResult<()> {
        let mut rows = self.satpoint_history(id)?;
        let existing = rows.iter_mut().find(|row| {
            row.tx_id.is_some()
                && row.tx_id == record.tx_id
                && row.vout == record.vout
                && row.offset == record.offset
        });
        match existing {
            Some(row) => {
                row.owner_address = record.owner_address;
                row.block_height = record.block_height;
            }
            None => rows.push(record),
        }
        put_record(self.tx()?, SATPOINTS, &id.to_string(), &rows)
    }

    fn append_satpoint(&mut self, id: &InscriptionId, record: SatPointRecord) -> StoreResult<()> {
        let mut rows = self.satpoint_history(id)?;
        rows.push(record);
        put_record(self.tx()?, SATPOINTS, &id.to_string(), &rows)
    }

    fn checksum(&self, block_height: u64) -> StoreResult<Option<ChecksumRecord>> {
        let table = self.tx()?.open_table(CHECKSUMS)?;
        let record = match table.get(block_height)? {
            Some(bytes) => Some(bincode::deserialize(bytes.value())?),
            None => None,
        };
        Ok(record)
    }

    fn put_checksum(&mut self, record: ChecksumRecord) -> StoreResult<()> {
        let bytes = bincode::serialize(&record)?;
        self.tx()?
            .open_table(CHECKSUMS)?
            .insert(record.block_height, bytes.as_slice())?;
        Ok(())
    }

    fn mark_reindexing(&mut self) -> StoreResult<()> {
        let tx = self.tx()?;
        let collections = mark_all(tx, COLLECTIONS, |c: &mut CollectionManifest| c.reindexing = true)?;
        let inscriptions = mark_all(tx, INSCRIPTIONS, |i: &mut InscriptionManifest| i.reindexing = true)?;
        let reveals = mark_all(tx, REVEALS, |r: &mut RevealManifest| r.reindexing = true)?;

        // Nothing is counted while everything awaits reindex.
        let mut counters = tx.open_table(COUNTERS)?;
        let mut keys = Vec::new();
        for entry in counters.iter()? {
            keys.push(entry?.0.value().to_owned());
        }
        for key in keys {
            counters.remove(key.as_str())?;
        }

        log::info!(
            "flagged {collections} collections, {inscriptions} inscriptions and {reveals} reveals for reindex"
        );
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit()?;
        }
        self.tx = Some(self.db.begin_write()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerificationError;
    use bitcoin::hashes::Hash;
    use bitcoin::{BlockHash, Txid};
    use brc721_support::SatPoint;

    fn store() -> RedbStore {
        RedbStore::in_memory().unwrap()
    }

    fn id(n: u8) -> InscriptionId {
        InscriptionId::new(Txid::from_byte_array([n; 32]), 0)
    }

    fn inscription(n: u8, collection: u8, satpoint: Option<SatPoint>) -> InscriptionManifest {
        InscriptionManifest {
            id: id(n),
            collection_id: id(collection),
            raw: "{}".into(),
            version: "1.0.0".into(),
            valid: true,
            verification_errors: Vec::new(),
            position: Some(1),
            price: None,
            initial_owner_address: None,
            inscriber_address: "bc1qinscriber".into(),
            satpoint,
            owner_address: Some("bc1qinscriber".into()),
            block_height: 1,
            transaction_index: 1,
            reindexing: false,
        }
    }

    fn collection(n: u8) -> CollectionManifest {
        CollectionManifest {
            id: id(n),
            raw: "{}".into(),
            version: "1.0.0".into(),
            name: "Genesis".into(),
            symbol: "GEN".into(),
            position: 1,
            max_supply: None,
            max_per_address: None,
            max_block_height: None,
            payment_address: "bc1qpay".into(),
            signer_public_key: "02".into(),
            inscriber_address: "bc1qinscriber".into(),
            block_height: 1,
            transaction_index: 1,
            reindexing: false,
        }
    }

    fn reveal(n: u8, collection: u8, weight: i64) -> RevealManifest {
        RevealManifest {
            id: id(n),
            collection_id: id(collection),
            raw: "{}".into(),
            version: "1.0.0".into(),
            valid: true,
            verification_errors: Vec::new(),
            weight,
            metadata_url: "https://example.com/meta.json".into(),
            inscriber_address: "bc1qinscriber".into(),
            block_height: 1,
            transaction_index: 1,
            reindexing: false,
        }
    }

    fn satpoint(n: u8, vout: u32, offset: u64) -> SatPoint {
        SatPoint::new(OutPoint::new(Txid::from_byte_array([n; 32]), vout), offset)
    }

    fn state(run: u64) -> State {
        State {
            run,
            hash: BlockHash::from_byte_array([9; 32]),
            height: 100,
            fallback_height: 80,
            checksum: String::new(),
        }
    }

    #[test]
    fn test_begin_run_creates_then_increments() {
        let mut store = store();
        assert_eq!(store.begin_run(state(1)).unwrap().run, 1);
        assert_eq!(store.begin_run(state(1)).unwrap().run, 2);
        assert_eq!(store.state().unwrap().unwrap().run, 2);
    }

    #[test]
    fn test_writes_are_visible_before_and_after_commit() {
        let mut store = store();
        store.put_state(state(3)).unwrap();
        assert_eq!(store.state().unwrap().unwrap().run, 3);
        store.commit().unwrap();
        assert_eq!(store.state().unwrap().unwrap().run, 3);
        assert!(store.path().is_none());
    }

    #[test]
    fn test_outpoint_index_follows_upserts() {
        let mut store = store();
        let first = satpoint(50, 0, 0);
        let second = satpoint(51, 1, 7);

        store.upsert_inscription(inscription(1, 10, Some(first))).unwrap();
        assert_eq!(
            store.inscriptions_on_outpoint(&first.outpoint).unwrap(),
            vec![(id(1), 0)]
        );

        store.upsert_inscription(inscription(1, 10, Some(second))).unwrap();
        assert!(store.inscriptions_on_outpoint(&first.outpoint).unwrap().is_empty());
        assert_eq!(
            store.inscriptions_on_outpoint(&second.outpoint).unwrap(),
            vec![(id(1), 7)]
        );

        store.upsert_inscription(inscription(1, 10, None)).unwrap();
        assert!(store.inscriptions_on_outpoint(&second.outpoint).unwrap().is_empty());
    }

    #[test]
    fn test_locator_skips_invalid_inscriptions() {
        let mut store = store();
        let location = satpoint(50, 0, 0);
        let mut invalid = inscription(2, 10, Some(location));
        invalid.valid = false;
        invalid.verification_errors = vec![VerificationError::BadSignature];
        store.upsert_inscription(invalid).unwrap();
        store.upsert_inscription(inscription(1, 10, Some(location))).unwrap();

        assert_eq!(
            store.inscriptions_on_outpoint(&location.outpoint).unwrap(),
            vec![(id(1), 0)]
        );
    }

    #[test]
    fn test_counts_exclude_self_and_reindexing() {
        let mut store = store();
        store.upsert_inscription(inscription(1, 10, None)).unwrap();
        store.upsert_inscription(inscription(2, 10, None)).unwrap();
        let mut other = inscription(3, 10, None);
        other.inscriber_address = "bc1qother".into();
        store.upsert_inscription(other).unwrap();
        store.upsert_inscription(inscription(4, 11, None)).unwrap();

        assert_eq!(store.count_valid_inscriptions(&id(10), None, &id(1)).unwrap(), 2);
        assert_eq!(store.count_valid_inscriptions(&id(10), None, &id(99)).unwrap(), 3);
        assert_eq!(store.count_valid_inscriptions(&id(10), None, &id(4)).unwrap(), 3);
        assert_eq!(
            store
                .count_valid_inscriptions(&id(10), Some("bc1qinscriber"), &id(99))
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .count_valid_inscriptions(&id(10), Some("bc1qother"), &id(1))
                .unwrap(),
            1
        );

        store.mark_reindexing().unwrap();
        assert_eq!(store.count_valid_inscriptions(&id(10), None, &id(99)).unwrap(), 0);
        assert!(store.inscription(&id(1)).unwrap().unwrap().reindexing);
    }

    #[test]
    fn test_counters_follow_validity_changes() {
        let mut store = store();
        store.upsert_inscription(inscription(1, 10, None)).unwrap();
        store.upsert_inscription(inscription(1, 10, None)).unwrap();
        assert_eq!(store.count_valid_inscriptions(&id(10), None, &id(99)).unwrap(), 1);

        let mut invalid = inscription(1, 10, None);
        invalid.valid = false;
        store.upsert_inscription(invalid).unwrap();
        assert_eq!(store.count_valid_inscriptions(&id(10), None, &id(99)).unwrap(), 0);

        store.upsert_collection(collection(10)).unwrap();
        store.upsert_collection(collection(10)).unwrap();
        store.upsert_collection(collection(11)).unwrap();
        assert_eq!(store.count_collections(&id(99)).unwrap(), 2);
        assert_eq!(store.count_collections(&id(10)).unwrap(), 1);

        store.mark_reindexing().unwrap();
        assert_eq!(store.count_collections(&id(99)).unwrap(), 0);
        store.upsert_collection(collection(11)).unwrap();
        assert_eq!(store.count_collections(&id(99)).unwrap(), 1);
    }

    #[test]
    fn test_reveals_are_listed_per_collection() {
        let mut store = store();
        store.upsert_reveal(reveal(20, 10, 1)).unwrap();
        store.upsert_reveal(reveal(21, 10, 2)).unwrap();
        store.upsert_reveal(reveal(22, 11, 3)).unwrap();
        store.upsert_reveal(reveal(20, 10, 1)).unwrap();

        let mut weights: Vec<i64> = store
            .reveals(&id(10))
            .unwrap()
            .iter()
            .map(|reveal| reveal.weight)
            .collect();
        weights.sort();
        assert_eq!(weights, vec![1, 2]);
        assert!(store.reveals(&id(12)).unwrap().is_empty());
    }

    #[test]
    fn test_satpoint_rows_upsert_located_and_append_unbound() {
        let mut store = store();
        let location = satpoint(50, 0, 0);
        store
            .upsert_satpoint(&id(1), SatPointRecord::located(location, None, 10))
            .unwrap();
        store
            .upsert_satpoint(&id(1), SatPointRecord::located(location, Some("bc1q".into()), 11))
            .unwrap();
        store.append_satpoint(&id(1), SatPointRecord::unbound(12)).unwrap();
        store.append_satpoint(&id(1), SatPointRecord::unbound(12)).unwrap();

        let history = store.satpoint_history(&id(1)).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].block_height, 11);
        assert_eq!(history[0].owner_address.as_deref(), Some("bc1q"));
        assert_eq!(history[0].satpoint(), Some(location));
        assert_eq!(history[1].satpoint(), None);
    }

    #[test]
    fn test_checksums_by_height() {
        let mut store = store();
        let record = ChecksumRecord {
            block_height: 100,
            block_hash: BlockHash::from_byte_array([9; 32]),
            checksum: "ab".into(),
        };
        store.put_checksum(record.clone()).unwrap();
        assert_eq!(store.checksum(100).unwrap(), Some(record));
        assert_eq!(store.checksum(101).unwrap(), None);
    }
}
