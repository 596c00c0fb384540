use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use brc721_support::InscriptionId;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Collection signer used across the tests.
pub const SIGNER_SECRET_KEY: &str =
    "6f9365940336767dfb406e0c6e192b1e238e63c8ce3330da487aa1c16bb9dc2b";

/// Signer key of the published genesis collection fixtures.
pub const FIXTURE_SIGNER_PUBLIC_KEY: &str =
    "0297715cd77cdbad806db9f79d8ebe2d12b5aea61b62811d042a6beb1a5cd80972";

pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const PAYMENT_ADDRESS: &str = "bc1qpaymentaddress0000000000000000000000";
pub const OWNER_ADDRESS: &str =
    "bc1pm57tpxmdtqcvmtm60rpa4nmjw3urtcwjpp9g2q3n8j4mt39evahsdhs2zr";

pub fn signer() -> SecretKey {
    let bytes = hex::decode(SIGNER_SECRET_KEY).expect("signer key hex");
    SecretKey::from_slice(&bytes).expect("signer key")
}

/// Compressed hex public key of [`signer`].
pub fn signer_public_key() -> String {
    public_key_hex(&signer())
}

pub fn public_key_hex(secret: &SecretKey) -> String {
    hex::encode(PublicKey::from_secret_key(&Secp256k1::new(), secret).serialize())
}

/// Hex DER signature by [`signer`] over SHA-256 of `content`.
pub fn sign(content: &str) -> String {
    sign_with(&signer(), content)
}

pub fn sign_with(secret: &SecretKey, content: &str) -> String {
    let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();
    let signature = Secp256k1::new().sign_ecdsa(&Message::from_digest(digest), secret);
    hex::encode(&*signature.serialize_der())
}

/// Collection payload signed by [`signer`], paying [`PAYMENT_ADDRESS`], with
/// no limits.
pub fn create_collection_payload() -> Value {
    create_collection_payload_for(&signer_public_key())
}

pub fn create_collection_payload_for(signer_public_key: &str) -> Value {
    json!({
        "type": "collection",
        "protocol": { "name": "BRC721", "version": PROTOCOL_VERSION },
        "name": "Genesis",
        "symbol": "GEN",
        "paymentAddress": PAYMENT_ADDRESS,
        "signerPublicKey": signer_public_key,
    })
}

/// Signed payload envelope around a literal content string.
pub fn create_signed_payload(kind: &str, content: &str, signature: &str) -> Value {
    json!({
        "type": kind,
        "protocol": { "name": "BRC721", "version": PROTOCOL_VERSION },
        "content": content,
        "contentSignature": signature,
    })
}

pub fn create_inscription_content(collection: &InscriptionId) -> Value {
    json!({ "collectionInscriptionId": collection.to_string() })
}

/// Inscription payload over `content`, signed by [`signer`].
pub fn create_inscription_payload(content: &Value) -> Value {
    let content = content.to_string();
    let signature = sign(&content);
    create_signed_payload("inscription", &content, &signature)
}

pub fn create_reveal_content(collection: &InscriptionId, weight: i64) -> Value {
    json!({
        "weight": weight,
        "metadataURL": "https://brc721.com/api/genesis/",
        "collectionInscriptionId": collection.to_string(),
    })
}

/// Reveal payload signed by [`signer`].
pub fn create_reveal_payload(collection: &InscriptionId, weight: i64) -> Value {
    let content = create_reveal_content(collection, weight).to_string();
    let signature = sign(&content);
    create_signed_payload("reveal", &content, &signature)
}
