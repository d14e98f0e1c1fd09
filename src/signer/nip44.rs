//! Symmetric payload encryption for gift-wrapped events — a NIP-44-v2-shaped
//! construction: ECDH shared secret -> HKDF-SHA256 conversation key ->
//! per-message HKDF-expand with a random salt into a ChaCha20
//! key/nonce/HMAC-key triple, ChaCha20 stream cipher for confidentiality,
//! HMAC-SHA256 over salt||ciphertext for authentication.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

use crate::error::BridgeError;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 2;
const SALT_LEN: usize = 32;
const MAC_LEN: usize = 32;

/// Derive the long-lived conversation key from a raw ECDH shared secret
/// (the shared point's x-coordinate).
pub fn conversation_key(shared_x: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(b"nip44-v2"), shared_x);
    let mut okm = [0u8; 32];
    hk.expand(&[], &mut okm).expect("32 is a valid HKDF-SHA256 output length");
    okm
}

fn message_keys(conversation_key: &[u8; 32], salt: &[u8]) -> ([u8; 32], [u8; 12], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(None, conversation_key);
    let mut okm = [0u8; 76];
    hk.expand(salt, &mut okm).expect("76 is a valid HKDF-SHA256 output length");
    let mut chacha_key = [0u8; 32];
    let mut nonce = [0u8; 12];
    let mut hmac_key = [0u8; 32];
    chacha_key.copy_from_slice(&okm[0..32]);
    nonce.copy_from_slice(&okm[32..44]);
    hmac_key.copy_from_slice(&okm[44..76]);
    (chacha_key, nonce, hmac_key)
}

/// Encrypt `plaintext` under `key` (the output of [`conversation_key`]).
/// Returns base64-encoded `version || salt || ciphertext || mac`.
pub fn encrypt(key: &[u8; 32], plaintext: &str) -> Result<String, BridgeError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let (chacha_key, nonce, hmac_key) = message_keys(key, &salt);

    let mut buf = plaintext.as_bytes().to_vec();
    let mut cipher = ChaCha20::new((&chacha_key).into(), (&nonce).into());
    cipher.apply_keystream(&mut buf);

    let mut mac = HmacSha256::new_from_slice(&hmac_key)
        .map_err(|e| BridgeError::Signing(format!("hmac key: {e}")))?;
    mac.update(&salt);
    mac.update(&buf);
    let tag = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + SALT_LEN + buf.len() + MAC_LEN);
    payload.push(VERSION);
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&buf);
    payload.extend_from_slice(&tag);

    Ok(STANDARD.encode(payload))
}

/// Decrypt a payload produced by [`encrypt`]. Any tampering (wrong key,
/// flipped ciphertext bit, truncated payload) surfaces as `DecryptFailed`.
pub fn decrypt(key: &[u8; 32], payload_b64: &str) -> Result<String, BridgeError> {
    let payload = STANDARD
        .decode(payload_b64)
        .map_err(|e| BridgeError::DecryptFailed(format!("invalid base64: {e}")))?;

    if payload.len() < 1 + SALT_LEN + MAC_LEN {
        return Err(BridgeError::DecryptFailed("payload too short".into()));
    }
    let version = payload[0];
    if version != VERSION {
        return Err(BridgeError::DecryptFailed(format!("unsupported version {version}")));
    }

    let salt = &payload[1..1 + SALT_LEN];
    let tag = &payload[payload.len() - MAC_LEN..];
    let ciphertext = &payload[1 + SALT_LEN..payload.len() - MAC_LEN];

    let (chacha_key, nonce, hmac_key) = message_keys(key, salt);

    let mut mac = HmacSha256::new_from_slice(&hmac_key)
        .map_err(|e| BridgeError::DecryptFailed(format!("hmac key: {e}")))?;
    mac.update(salt);
    mac.update(ciphertext);
    mac.verify_slice(tag)
        .map_err(|_| BridgeError::DecryptFailed("authentication tag mismatch".into()))?;

    let mut buf = ciphertext.to_vec();
    let mut cipher = ChaCha20::new((&chacha_key).into(), (&nonce).into());
    cipher.apply_keystream(&mut buf);

    String::from_utf8(buf).map_err(|e| BridgeError::DecryptFailed(format!("not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [7u8; 32];
        let ct = encrypt(&key, "hello nostr").unwrap();
        let pt = decrypt(&key, &ct).unwrap();
        assert_eq!(pt, "hello nostr");
    }

    #[test]
    fn tamper_detected() {
        let key = [7u8; 32];
        let mut ct = STANDARD.decode(encrypt(&key, "hello").unwrap()).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        let tampered = STANDARD.encode(ct);
        assert!(decrypt(&key, &tampered).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let ct = encrypt(&[1u8; 32], "hello").unwrap();
        assert!(decrypt(&[2u8; 32], &ct).is_err());
    }
}
