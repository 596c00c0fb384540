//! Protocol verification of BRC721 payloads.
//!
//! Hard failures ([`Rejection`]) leave the store untouched. Everything that
//! gets past them is persisted, with soft failures recorded on the manifest
//! in the order they were detected.

use crate::envelope::TxInscription;
use crate::error::{Rejection, Result, VerificationError};
use crate::manifest::{
    parse_content, CollectionPayload, InscriptionContent, Payload, RevealContent, SignedPayload,
};
use crate::signature::verify_content_signature;
use crate::store::{CollectionManifest, InscriptionManifest, RevealManifest, SatPointRecord, Store};
use bitcoin::{Amount, OutPoint};
use brc721_support::SatPoint;

/// Recorded as inscriber when the first output has no address.
pub const UNKNOWN_ADDRESS: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rejected(Rejection),
    Collection(CollectionManifest),
    Inscription(InscriptionManifest),
    Reveal(RevealManifest),
}

impl Outcome {
    pub fn verification_errors(&self) -> &[VerificationError] {
        match self {
            Self::Inscription(manifest) => &manifest.verification_errors,
            Self::Reveal(manifest) => &manifest.verification_errors,
            Self::Rejected(_) | Self::Collection(_) => &[],
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

pub struct Verifier<'a, S: ?Sized> {
    store: &'a mut S,
}

impl<'a, S: Store + ?Sized> Verifier<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Verifies in order; later inscriptions observe earlier ones.
    pub fn verify_all(&mut self, inscriptions: &[TxInscription]) -> Result<Vec<Outcome>> {
        inscriptions.iter().map(|tx| self.verify(tx)).collect()
    }

    /// A manifest already stored for `tx` and not awaiting reindex is
    /// returned unchanged, so replaying a block never moves a position.
    pub fn verify(&mut self, tx: &TxInscription) -> Result<Outcome> {
        let outcome = match Payload::parse(&tx.inscription_content) {
            Payload::Malformed(rejection) => Outcome::Rejected(rejection),
            Payload::Collection(payload) => self.index_collection(tx, payload)?,
            Payload::Inscription(payload) => self.index_inscription(tx, payload)?,
            Payload::Reveal(payload) => self.index_reveal(tx, payload)?,
        };

        match &outcome {
            Outcome::Rejected(rejection) => log::debug!("{} rejected: {rejection}", tx.id()),
            outcome => log::debug!(
                "{} indexed with errors {:?}",
                tx.id(),
                outcome.verification_errors()
            ),
        }
        Ok(outcome)
    }

    fn index_collection(&mut self, tx: &TxInscription, payload: CollectionPayload) -> Result<Outcome> {
        let id = tx.id();
        if let Some(stored) = self.store.collection(&id)?.filter(|stored| !stored.reindexing) {
            return Ok(Outcome::Collection(stored));
        }
        let manifest = CollectionManifest {
            id,
            raw: tx.inscription_content.clone(),
            version: payload.protocol.version,
            name: payload.name,
            symbol: payload.symbol,
            position: self.store.count_collections(&id)? + 1,
            max_supply: payload.max_supply,
            max_per_address: payload.max_per_address,
            max_block_height: payload.max_block_height,
            payment_address: payload.payment_address,
            signer_public_key: payload.signer_public_key,
            inscriber_address: inscriber(tx),
            block_height: tx.block_height,
            transaction_index: tx.index,
            reindexing: false,
        };
        self.store.upsert_collection(manifest.clone())?;
        Ok(Outcome::Collection(manifest))
    }

    fn index_inscription(&mut self, tx: &TxInscription, payload: SignedPayload) -> Result<Outcome> {
        let id = tx.id();
        if let Some(stored) = self.store.inscription(&id)?.filter(|stored| !stored.reindexing) {
            return Ok(Outcome::Inscription(stored));
        }
        let content: InscriptionContent = match parse_content(&payload.content) {
            Ok(content) => content,
            Err(rejection) => return Ok(Outcome::Rejected(rejection)),
        };

        let mut errors = Vec::new();
        if let Some(declared) = content.initial_owner_address.as_deref() {
            if tx.owner_address() != Some(declared) {
                errors.push(VerificationError::NotOwner);
            }
        }

        let Some(collection) = self.store.collection(&content.collection_inscription_id)? else {
            return Ok(Outcome::Rejected(Rejection::NoCollectionManifest));
        };
        check_signed_payload(&payload, &collection, &mut errors);

        if let Some(max_block_height) = declared(collection.max_block_height) {
            if tx.block_height > max_block_height {
                errors.push(VerificationError::MaxBlockHeight);
            }
        }

        if let Some(price) = declared(content.price) {
            let paid: Amount = tx
                .vout
                .iter()
                .filter(|output| output.address() == Some(collection.payment_address.as_str()))
                .map(|output| output.value)
                .sum();
            if paid < Amount::from_sat(price) {
                errors.push(VerificationError::InsufficientFunds);
            }
        }

        let inscriber = inscriber(tx);
        let supply = self.store.count_valid_inscriptions(&collection.id, None, &id)?;
        if let Some(max_supply) = declared(collection.max_supply) {
            if supply + 1 > max_supply {
                errors.push(VerificationError::MaxSupply);
            }
        }
        if let Some(max_per_address) = declared(collection.max_per_address) {
            let minted = self
                .store
                .count_valid_inscriptions(&collection.id, Some(&inscriber), &id)?;
            if minted + 1 > max_per_address {
                errors.push(VerificationError::MaxPerAddress);
            }
        }

        let valid = errors.is_empty();
        let satpoint = SatPoint::new(OutPoint::new(tx.txid, 0), 0);
        let manifest = InscriptionManifest {
            id,
            collection_id: collection.id,
            raw: tx.inscription_content.clone(),
            version: payload.protocol.version,
            valid,
            verification_errors: errors,
            position: valid.then_some(supply + 1),
            price: content.price,
            initial_owner_address: content.initial_owner_address,
            inscriber_address: inscriber.clone(),
            satpoint: Some(satpoint),
            owner_address: Some(inscriber.clone()),
            block_height: tx.block_height,
            transaction_index: tx.index,
            reindexing: false,
        };
        self.store.upsert_inscription(manifest.clone())?;
        self.store.upsert_satpoint(
            &id,
            SatPointRecord::located(satpoint, Some(inscriber), tx.block_height),
        )?;
        Ok(Outcome::Inscription(manifest))
    }

    fn index_reveal(&mut self, tx: &TxInscription, payload: SignedPayload) -> Result<Outcome> {
        let id = tx.id();
        if let Some(stored) = self.store.reveal(&id)?.filter(|stored| !stored.reindexing) {
            return Ok(Outcome::Reveal(stored));
        }
        let content: RevealContent = match parse_content(&payload.content) {
            Ok(content) => content,
            Err(rejection) => return Ok(Outcome::Rejected(rejection)),
        };
        let Some(collection) = self.store.collection(&content.collection_inscription_id)? else {
            return Ok(Outcome::Rejected(Rejection::NoCollectionManifest));
        };

        let mut errors = Vec::new();
        check_signed_payload(&payload, &collection, &mut errors);

        let others: Vec<RevealManifest> = self
            .store
            .reveals(&collection.id)?
            .into_iter()
            .filter(|reveal| reveal.id != id)
            .collect();
        let weight_to_beat = others
            .iter()
            .filter(|reveal| reveal.valid)
            .map(|reveal| reveal.weight)
            .max()
            .unwrap_or(i64::MIN);
        let valid = errors.is_empty() && content.weight > weight_to_beat;

        if valid {
            for mut other in others.into_iter().filter(|reveal| reveal.valid) {
                if !other.verification_errors.contains(&VerificationError::OutdatedReveal) {
                    other.verification_errors.push(VerificationError::OutdatedReveal);
                }
                other.valid = false;
                self.store.upsert_reveal(other)?;
            }
        }

        let manifest = RevealManifest {
            id,
            collection_id: collection.id,
            raw: tx.inscription_content.clone(),
            version: payload.protocol.version,
            valid,
            verification_errors: errors,
            weight: content.weight,
            metadata_url: content.metadata_url,
            inscriber_address: inscriber(tx),
            block_height: tx.block_height,
            transaction_index: tx.index,
            reindexing: false,
        };
        self.store.upsert_reveal(manifest.clone())?;
        Ok(Outcome::Reveal(manifest))
    }
}

fn check_signed_payload(
    payload: &SignedPayload,
    collection: &CollectionManifest,
    errors: &mut Vec<VerificationError>,
) {
    if payload.protocol.version != collection.version {
        errors.push(VerificationError::DifferentVersion);
    }
    if !verify_content_signature(
        &collection.signer_public_key,
        &payload.content_signature,
        &payload.content,
    ) {
        errors.push(VerificationError::BadSignature);
    }
}

/// Zero limits count as undeclared.
fn declared(limit: Option<u64>) -> Option<u64> {
    limit.filter(|&limit| limit > 0)
}

fn inscriber(tx: &TxInscription) -> String {
    tx.owner_address().unwrap_or(UNKNOWN_ADDRESS).to_owned()
}
