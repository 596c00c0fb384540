use crate::queue::QueueError;
use crate::rpc::RpcError;
use crate::store::StoreError;
use bitcoin::Txid;
use brc721_support::InscriptionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reasons a payload is rejected outright. No manifest is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    NotJson,
    UnknownType,
    CollectionSchema,
    InscriptionSchema,
    RevealSchema,
    NotJsonContent,
    ContentSchema,
    NoCollectionManifest,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotJson => "NOT_JSON",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::CollectionSchema => "COLLECTION_SCHEMA",
            Self::InscriptionSchema => "INSCRIPTION_SCHEMA",
            Self::RevealSchema => "REVEAL_SCHEMA",
            Self::NotJsonContent => "NOT_JSON_CONTENT",
            Self::ContentSchema => "CONTENT_SCHEMA",
            Self::NoCollectionManifest => "NO_COLLECTION_MANIFEST",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Soft verification failures. The manifest is still persisted, with
/// `valid = false`, and these are recorded on it in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationError {
    NotOwner,
    DifferentVersion,
    BadSignature,
    MaxBlockHeight,
    InsufficientFunds,
    MaxSupply,
    MaxPerAddress,
    OutdatedReveal,
}

impl VerificationError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotOwner => "NOT_OWNER",
            Self::DifferentVersion => "DIFFERENT_VERSION",
            Self::BadSignature => "BAD_SIGNATURE",
            Self::MaxBlockHeight => "MAX_BLOCK_HEIGHT",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::MaxSupply => "MAX_SUPPLY",
            Self::MaxPerAddress => "MAX_PER_ADDRESS",
            Self::OutdatedReveal => "OUTDATED_REVEAL",
        }
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Faults that abort the job being processed.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("ERROR: STATE (state row missing)")]
    MissingState,
    #[error("UNDO_DATA: input {input} of {txid} has no previous output")]
    UndoData { txid: Txid, input: usize },
    #[error("inscription {0} not found")]
    UnknownInscription(InscriptionId),
    #[error("node: {0}")]
    Node(#[from] RpcError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error("encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T, E = IndexerError> = std::result::Result<T, E>;
