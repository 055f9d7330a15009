//! Record payloads are sealed on the client before they go anywhere. The
//! host stores and versions them but can never read them.

use blake2::{Blake2b512, Digest};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sphinx_host_api::types::EncryptedBlob;
use sphinx_marshalling::bytes;

const RECORD_KEY_CONTEXT: &[u8] = b"sphinx record key";

/// What actually lives inside a record version.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub(crate) enum RecordPayload {
    /// A generated-password record: the password is recomputed from the
    /// hardened secret, this salt, and the policy. Changing the salt is
    /// what makes `change` produce a fresh password.
    DerivedPassword {
        #[serde(with = "bytes")]
        salt: [u8; 32],
        classes: String,
        length: u32,
    },
    /// An opaque byte blob stored via `write`.
    Blob(#[serde(with = "bytes")] Vec<u8>),
}

impl RecordPayload {
    pub fn seal<Rng: RngCore + CryptoRng + Send>(
        &self,
        hardened_secret: &sphinx_oprf::Output,
        rng: &mut Rng,
    ) -> EncryptedBlob {
        let plaintext = sphinx_marshalling::to_vec(self).expect("payload serialization failed");

        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);
        let mut sealed = ChaCha20Poly1305::new(Key::from_slice(&sphinx_pake::derive_key(hardened_secret, RECORD_KEY_CONTEXT)))
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &[],
                },
            )
            .expect("payload encryption failed");

        let mut blob = nonce.to_vec();
        blob.append(&mut sealed);
        EncryptedBlob(blob)
    }

    /// Fails for blobs sealed under a different hardened secret or
    /// tampered with in storage.
    pub fn open(
        blob: &EncryptedBlob,
        hardened_secret: &sphinx_oprf::Output,
    ) -> Result<Self, &'static str> {
        if blob.0.len() < 12 {
            return Err("invalid record payload");
        }
        let (nonce, ciphertext) = blob.0.split_at(12);
        let plaintext = ChaCha20Poly1305::new(Key::from_slice(&sphinx_pake::derive_key(hardened_secret, RECORD_KEY_CONTEXT)))
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| "invalid record payload")?;
        sphinx_marshalling::from_slice(&plaintext).map_err(|_| "invalid record payload")
    }
}

/// Seed for the rule engine, bound to both the hardened secret and the
/// per-version salt.
pub(crate) fn password_seed(hardened_secret: &sphinx_oprf::Output, salt: &[u8; 32]) -> [u8; 64] {
    Blake2b512::new()
        .chain_update(hardened_secret.expose_secret())
        .chain_update(salt)
        .finalize()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn hardened(seed: &[u8]) -> sphinx_oprf::Output {
        let key = sphinx_oprf::PrivateKey::try_from([5; 32]).unwrap();
        sphinx_oprf::unoblivious_evaluate(&key, seed)
    }

    #[test]
    fn test_seal_open_round_trip() {
        let secret = hardened(b"pwd");
        let payload = RecordPayload::DerivedPassword {
            salt: [3; 32],
            classes: "uld".to_string(),
            length: 20,
        };
        let sealed = payload.seal(&secret, &mut OsRng);
        assert_eq!(RecordPayload::open(&sealed, &secret).unwrap(), payload);
    }

    #[test]
    fn test_open_with_wrong_secret_fails() {
        let sealed = RecordPayload::Blob(b"data".to_vec()).seal(&hardened(b"pwd"), &mut OsRng);
        assert!(RecordPayload::open(&sealed, &hardened(b"other")).is_err());
    }

    #[test]
    fn test_open_tampered_blob_fails() {
        let secret = hardened(b"pwd");
        let mut sealed = RecordPayload::Blob(b"data".to_vec()).seal(&secret, &mut OsRng);
        let last = sealed.0.len() - 1;
        sealed.0[last] ^= 1;
        assert!(RecordPayload::open(&sealed, &secret).is_err());
    }

    #[test]
    fn test_password_seed_depends_on_salt() {
        let secret = hardened(b"pwd");
        assert_ne!(password_seed(&secret, &[1; 32]), password_seed(&secret, &[2; 32]));
    }
}
