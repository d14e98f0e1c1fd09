//! Signer. Owns the long-term keypair exclusively; peers only ever
//! see the public key. Produces Schnorr-signed events and performs
//! ECDH-then-symmetric authenticated encryption with a peer.

mod nip44;

use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use signature::{Signer as _, Verifier as _};

use crate::error::BridgeError;
use crate::event::{Event, UnsignedEvent};

/// Produces signed events and performs authenticated encryption for one
/// long-term Nostr identity.
pub struct Signer {
    secret: k256::SecretKey,
    signing_key: SigningKey,
    public_key_hex: String,
}

impl Signer {
    /// Build a signer from 32 raw secret bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, BridgeError> {
        let secret = k256::SecretKey::from_slice(bytes)
            .map_err(|e| BridgeError::Signing(format!("invalid secret key: {e}")))?;
        Self::from_secret(secret)
    }

    /// Build a signer from a hex-encoded 32-byte secret.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, BridgeError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| BridgeError::Signing(format!("invalid secret hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BridgeError::Signing("secret key must be 32 bytes".into()))?;
        Self::from_secret_bytes(&arr)
    }

    /// Build a signer carrying a fresh random secret — used both for a
    /// caller that did not supply one, and to derive the ephemeral
    /// wrapping keypairs used by gift-wrap.
    pub fn generate() -> Self {
        let secret = k256::SecretKey::random(&mut OsRng);
        Self::from_secret(secret).expect("freshly generated secret key is always valid")
    }

    fn from_secret(secret: k256::SecretKey) -> Result<Self, BridgeError> {
        let signing_key = SigningKey::from(&secret);
        let public_key_hex = hex::encode(signing_key.verifying_key().to_bytes());
        Ok(Self {
            secret,
            signing_key,
            public_key_hex,
        })
    }

    /// This identity's x-only public key, hex-encoded.
    pub fn public_key(&self) -> &str {
        &self.public_key_hex
    }

    /// Sign a template, filling in `id` (hash of the canonical serialization)
    /// and `sig` (Schnorr signature over the id).
    pub fn sign(&self, template: UnsignedEvent) -> Result<Event, BridgeError> {
        let id_hex = template.id();
        let id_bytes = hex::decode(&id_hex).expect("id() always returns valid hex");
        let signature: Signature = self
            .signing_key
            .try_sign(&id_bytes)
            .map_err(|e| BridgeError::Signing(format!("sign failed: {e}")))?;

        Ok(Event {
            id: id_hex,
            pubkey: template.pubkey,
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: hex::encode(signature.to_bytes()),
        })
    }

    /// Verify that `event` is well-formed and its signature verifies under
    /// its own stated public key.
    pub fn verify(event: &Event) -> Result<(), BridgeError> {
        event.check_well_formed()?;

        let pubkey_bytes = decode_32(&event.pubkey, "pubkey")?;
        let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes)
            .map_err(|e| BridgeError::Signing(format!("invalid pubkey: {e}")))?;

        let sig_bytes = hex::decode(&event.sig)
            .map_err(|e| BridgeError::Signing(format!("invalid sig hex: {e}")))?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|e| BridgeError::Signing(format!("invalid signature: {e}")))?;

        let id_bytes = decode_32(&event.id, "id")?;
        verifying_key
            .verify(&id_bytes, &signature)
            .map_err(|_| BridgeError::Signing("signature does not verify".into()))
    }

    /// Derive the ECDH shared secret's x-coordinate with a peer named by
    /// their x-only hex public key, lifting it to a full point with an
    /// even-y convention (the BIP340 x-only encoding).
    fn shared_x(&self, peer_pubkey_hex: &str) -> Result<[u8; 32], BridgeError> {
        let xonly = decode_32(peer_pubkey_hex, "peer pubkey")?;
        let mut compressed = [0u8; 33];
        compressed[0] = 0x02;
        compressed[1..].copy_from_slice(&xonly);

        let peer_point = k256::PublicKey::from_sec1_bytes(&compressed)
            .map_err(|e| BridgeError::Signing(format!("invalid peer pubkey: {e}")))?;

        let shared = k256::ecdh::diffie_hellman(
            self.secret.to_nonzero_scalar(),
            peer_point.as_affine(),
        );

        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }

    /// Authenticated-encrypt `plaintext` for `peer_pubkey_hex`.
    pub fn encrypt(&self, peer_pubkey_hex: &str, plaintext: &str) -> Result<String, BridgeError> {
        let shared = self.shared_x(peer_pubkey_hex)?;
        let key = nip44::conversation_key(&shared);
        nip44::encrypt(&key, plaintext)
    }

    /// Decrypt a payload produced by [`Signer::encrypt`] from `peer_pubkey_hex`.
    pub fn decrypt(&self, peer_pubkey_hex: &str, ciphertext: &str) -> Result<String, BridgeError> {
        let shared = self.shared_x(peer_pubkey_hex)?;
        let key = nip44::conversation_key(&shared);
        nip44::decrypt(&key, ciphertext)
    }
}

fn decode_32(hex_str: &str, what: &str) -> Result<[u8; 32], BridgeError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| BridgeError::Signing(format!("invalid {what} hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| BridgeError::Signing(format!("{what} must be 32 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = Signer::generate();
        let template = UnsignedEvent::new(signer.public_key(), 1, vec![], "hi");
        let event = signer.sign(template).unwrap();
        Signer::verify(&event).unwrap();
    }

    #[test]
    fn tampered_content_fails_verification() {
        let signer = Signer::generate();
        let template = UnsignedEvent::new(signer.public_key(), 1, vec![], "hi");
        let mut event = signer.sign(template).unwrap();
        event.content = "tampered".into();
        assert!(Signer::verify(&event).is_err());
    }

    #[test]
    fn encrypt_decrypt_round_trip_between_two_signers() {
        let alice = Signer::generate();
        let bob = Signer::generate();

        let ciphertext = alice.encrypt(bob.public_key(), "secret request").unwrap();
        let plaintext = bob.decrypt(alice.public_key(), &ciphertext).unwrap();
        assert_eq!(plaintext, "secret request");
    }

    #[test]
    fn decrypt_with_wrong_peer_fails() {
        let alice = Signer::generate();
        let bob = Signer::generate();
        let eve = Signer::generate();

        let ciphertext = alice.encrypt(bob.public_key(), "secret").unwrap();
        assert!(eve.decrypt(alice.public_key(), &ciphertext).is_err());
    }
}
