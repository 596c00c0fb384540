//! BRC721 payload shapes.
//!
//! A payload is classified once, by its `type` field, into [`Payload`]. The
//! typed shapes double as the schemas: a payload conforms iff it
//! deserializes into its shape and names the `BRC721` protocol.

use crate::error::Rejection;
use brc721_support::InscriptionId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_NAME: &str = "BRC721";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPayload {
    pub protocol: Protocol,
    pub name: String,
    pub symbol: String,
    pub payment_address: String,
    pub signer_public_key: String,
    #[serde(default)]
    pub max_supply: Option<u64>,
    #[serde(default)]
    pub max_per_address: Option<u64>,
    #[serde(default)]
    pub max_block_height: Option<u64>,
}

/// Envelope shared by inscription and reveal payloads: a JSON string signed
/// by the collection's signer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    pub protocol: Protocol,
    pub content: String,
    pub content_signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InscriptionContent {
    pub collection_inscription_id: InscriptionId,
    /// Minimum payment in sats to the collection's payment address.
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub initial_owner_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealContent {
    pub weight: i64,
    #[serde(rename = "metadataURL")]
    pub metadata_url: String,
    pub collection_inscription_id: InscriptionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Collection(CollectionPayload),
    Inscription(SignedPayload),
    Reveal(SignedPayload),
    Malformed(Rejection),
}

impl Payload {
    pub fn parse(content: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(content) else {
            return Self::Malformed(Rejection::NotJson);
        };
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);

        match kind.as_deref() {
            Some("collection") => match conform::<CollectionPayload>(value) {
                Some(payload) if payload.protocol.name == PROTOCOL_NAME => {
                    Self::Collection(payload)
                }
                _ => Self::Malformed(Rejection::CollectionSchema),
            },
            Some("inscription") => match conform::<SignedPayload>(value) {
                Some(payload) if payload.protocol.name == PROTOCOL_NAME => {
                    Self::Inscription(payload)
                }
                _ => Self::Malformed(Rejection::InscriptionSchema),
            },
            Some("reveal") => match conform::<SignedPayload>(value) {
                Some(payload) if payload.protocol.name == PROTOCOL_NAME => Self::Reveal(payload),
                _ => Self::Malformed(Rejection::RevealSchema),
            },
            _ => Self::Malformed(Rejection::UnknownType),
        }
    }
}

fn conform<T: DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

/// Parses the nested `content` string of a signed payload.
pub fn parse_content<T: DeserializeOwned>(content: &str) -> Result<T, Rejection> {
    let value: Value = serde_json::from_str(content).map_err(|_| Rejection::NotJsonContent)?;
    conform(value).ok_or(Rejection::ContentSchema)
}
