use bitcoin::secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

static SECP: Lazy<Secp256k1<VerifyOnly>> = Lazy::new(Secp256k1::verification_only);

/// Uncompressed key length without its leading `0x04` tag.
const BARE_UNCOMPRESSED_KEY_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("secp256k1: {0}")]
    Secp(#[from] bitcoin::secp256k1::Error),
}

/// Checks a hex DER signature over the SHA-256 of `content` against a hex
/// public key. High-S signatures are accepted.
pub fn verify_content_signature(public_key: &str, signature: &str, content: &str) -> bool {
    match check_content_signature(public_key, signature, content) {
        Ok(()) => true,
        Err(err) => {
            log::debug!("signature rejected: {err}");
            false
        }
    }
}

pub fn check_content_signature(
    public_key: &str,
    signature: &str,
    content: &str,
) -> Result<(), SignatureError> {
    let mut key = hex::decode(public_key)?;
    if key.len() == BARE_UNCOMPRESSED_KEY_SIZE {
        key.insert(0, 0x04);
    }
    let key = PublicKey::from_slice(&key)?;

    let der = hex::decode(signature)?;
    let mut signature = Signature::from_der(&der).or_else(|_| Signature::from_der_lax(&der))?;
    signature.normalize_s();

    let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();
    SECP.verify_ecdsa(&Message::from_digest(digest), &signature, &key)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;

    fn signed(content: &str) -> (SecretKey, PublicKey, String) {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret);
        let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();
        let signature = secp.sign_ecdsa(&Message::from_digest(digest), &secret);
        (secret, public, hex::encode(&*signature.serialize_der()))
    }

    #[test]
    fn test_accepts_compressed_key() {
        let (_, public, signature) = signed("hello");
        assert!(verify_content_signature(&hex::encode(public.serialize()), &signature, "hello"));
        assert!(!verify_content_signature(&hex::encode(public.serialize()), &signature, "hellO"));
    }

    #[test]
    fn test_accepts_bare_uncompressed_key() {
        let (_, public, signature) = signed("hello");
        let bare = hex::encode(&public.serialize_uncompressed()[1..]);
        assert_eq!(bare.len(), 128);
        assert!(verify_content_signature(&bare, &signature, "hello"));
    }

    #[test]
    fn test_accepts_high_s() {
        let (_, public, _) = signed("hello");
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let digest: [u8; 32] = Sha256::digest(b"hello").into();
        let low = secp.sign_ecdsa(&Message::from_digest(digest), &secret);

        // s' = n - s is the high-S twin of the same signature.
        let compact = low.serialize_compact();
        let order = bitcoin::secp256k1::constants::CURVE_ORDER;
        let mut high_s = [0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let diff = order[i] as i16 - compact[32 + i] as i16 - borrow;
            borrow = i16::from(diff < 0);
            high_s[i] = diff.rem_euclid(256) as u8;
        }
        let mut raw = [0u8; 64];
        raw[..32].copy_from_slice(&compact[..32]);
        raw[32..].copy_from_slice(&high_s);
        let high = Signature::from_compact(&raw).unwrap();
        assert_ne!(high, low);

        let der = hex::encode(&*high.serialize_der());
        assert!(verify_content_signature(&hex::encode(public.serialize()), &der, "hello"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let (_, public, signature) = signed("hello");
        let key = hex::encode(public.serialize());
        assert!(!verify_content_signature(&key, "1", "hello"));
        assert!(!verify_content_signature(&key, "bad-signature", "hello"));
        assert!(!verify_content_signature("zz", &signature, "hello"));
        assert!(!verify_content_signature(&key[..10], &signature, "hello"));
    }
}
