//! The credential envelope stored inside an authentication record.
//!
//! Sealed under a key derived from the hardened secret, so only a client
//! who knows the password (and ran the OPRF exchange) can open it. The host
//! stores and returns it but cannot inspect it.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use curve25519_dalek::{RistrettoPoint, Scalar};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use sphinx_marshalling::bytes;

use crate::{derive_key, PakeError};

const SEAL_CONTEXT: &[u8] = b"sphinx envelope seal";

/// What the client locks away at registration: its own long-term private
/// key, the host's public key, and the caller's extra data.
#[cfg_attr(test, derive(Debug))]
#[derive(Deserialize, Serialize)]
pub(crate) struct EnvelopeContents {
    #[serde(with = "bytes")]
    pub client_private_key: Scalar,
    #[serde(with = "bytes")]
    pub server_public_key: RistrettoPoint,
    #[serde(with = "bytes")]
    pub extra: Vec<u8>,
}

impl Drop for EnvelopeContents {
    fn drop(&mut self) {
        self.client_private_key.zeroize();
        self.extra.zeroize();
    }
}

#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(with = "bytes")]
    nonce: [u8; 12],
    #[serde(with = "bytes")]
    ciphertext: Vec<u8>,
}

impl core::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Envelope").finish_non_exhaustive()
    }
}

impl Envelope {
    pub(crate) fn seal<Rng: RngCore + CryptoRng + Send>(
        hardened_secret: &sphinx_oprf::Output,
        contents: &EnvelopeContents,
        rng: &mut Rng,
    ) -> Self {
        let mut plaintext =
            sphinx_marshalling::to_vec(contents).expect("envelope serialization failed");

        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);

        let key = derive_key(hardened_secret, SEAL_CONTEXT);
        let ciphertext = ChaCha20Poly1305::new(Key::from_slice(&key))
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &[],
                },
            )
            .expect("envelope encryption failed");
        plaintext.zeroize();

        Self { nonce, ciphertext }
    }

    /// Fails exactly when the hardened secret does not match the one the
    /// envelope was sealed under, i.e. when the password is wrong.
    pub(crate) fn open(
        &self,
        hardened_secret: &sphinx_oprf::Output,
    ) -> Result<EnvelopeContents, PakeError> {
        let key = derive_key(hardened_secret, SEAL_CONTEXT);
        let mut plaintext = ChaCha20Poly1305::new(Key::from_slice(&key))
            .decrypt(
                Nonce::from_slice(&self.nonce),
                Payload {
                    msg: &self.ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| PakeError::AuthenticationFailed)?;

        let contents = sphinx_marshalling::from_slice(&plaintext)
            .map_err(|_| PakeError::AuthenticationFailed)?;
        plaintext.zeroize();
        Ok(contents)
    }
}
