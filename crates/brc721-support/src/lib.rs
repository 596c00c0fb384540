//! Shared types for the brc721 indexer crates.

pub mod inscription;
pub mod rpc;

pub use inscription::{InscriptionId, ParseInscriptionIdError, SatPoint};
