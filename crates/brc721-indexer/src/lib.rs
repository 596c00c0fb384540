//! BRC721 indexer: extracts inscription envelopes from blocks, verifies
//! collection / inscription / reveal manifests and tracks inscribed sats
//! across spends.

pub mod checksum;
pub mod config;
pub mod envelope;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod queue;
pub mod rpc;
pub mod signature;
pub mod store;
pub mod tables;
pub mod transfers;
pub mod verifier;

pub use error::{IndexerError, Rejection, Result, VerificationError};
pub use orchestrator::{bootstrap, Indexer, JobOutcome};
pub use store::{InscriptionLocator, Store};
pub use tables::RedbStore;
