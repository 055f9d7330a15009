use blake2::Blake2sMac256;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use core::fmt::{self, Debug};
use digest::Mac;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use sphinx_marshalling::{bytes, to_be4};
use sphinx_pake::derive_key;

/// A fixed-length byte secret: wiped on drop, redacted in debug output.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct SecretBytesArray<const N: usize>(#[serde(with = "bytes")] [u8; N]);

impl<const N: usize> SecretBytesArray<N> {
    pub fn expose_secret(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> Zeroize for SecretBytesArray<N> {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> Drop for SecretBytesArray<N> {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<const N: usize> Debug for SecretBytesArray<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytesArray(REDACTED)")
    }
}

impl<const N: usize> From<[u8; N]> for SecretBytesArray<N> {
    fn from(value: [u8; N]) -> Self {
        Self(value)
    }
}

/// A variable-length byte secret: wiped on drop, redacted in debug output.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct SecretBytesVec(#[serde(with = "bytes")] Vec<u8>);

impl SecretBytesVec {
    pub fn expose_secret(&self) -> &[u8] {
        &self.0
    }
}

impl Zeroize for SecretBytesVec {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for SecretBytesVec {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Debug for SecretBytesVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytesVec(REDACTED)")
    }
}

impl From<Vec<u8>> for SecretBytesVec {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// Separates the blinded-identifier namespaces for generated-password
/// records and raw blob records, so `write` can never clobber a password
/// record for the same (user, host).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordDomain {
    Password,
    Blob,
}

impl RecordDomain {
    fn label(&self) -> &'static [u8] {
        match self {
            Self::Password => b"password record",
            Self::Blob => b"blob record",
        }
    }
}

/// The blinded storage key for a record.
///
/// Deterministic in (password, user, host): the same inputs always address
/// the same record, but the host cannot recover user or host names from it
/// without the hardened secret.
#[derive(Clone, Copy, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct RecordId(#[serde(with = "bytes")] pub [u8; 32]);

impl RecordId {
    pub fn derive(
        hardened_secret: &sphinx_oprf::Output,
        user: &str,
        host: &str,
        domain: RecordDomain,
    ) -> Self {
        Self(keyed_identifier(
            hardened_secret,
            domain.label(),
            &[user.as_bytes(), host.as_bytes()],
        ))
    }
}

impl Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", hex::encode(self.0))
    }
}

/// The blinded storage key for a host's user index. Derived from the
/// hardened secret and the host name only, so every record a user creates
/// at one host shares the index.
#[derive(Clone, Copy, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct IndexId(#[serde(with = "bytes")] pub [u8; 32]);

impl IndexId {
    pub fn derive(hardened_secret: &sphinx_oprf::Output, host: &str) -> Self {
        Self(keyed_identifier(
            hardened_secret,
            b"user index",
            &[host.as_bytes()],
        ))
    }
}

impl Debug for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexId({})", hex::encode(self.0))
    }
}

/// MAC of length-prefixed parts under a key only derivable from the
/// hardened secret. Uniform, fixed-width, and free of partial information
/// about the plaintext inputs.
fn keyed_identifier(
    hardened_secret: &sphinx_oprf::Output,
    label: &'static [u8],
    parts: &[&[u8]],
) -> [u8; 32] {
    let key = derive_key(hardened_secret, b"sphinx identifier key");
    let mut mac = <Blake2sMac256 as Mac>::new_from_slice(&key).expect("fixed-size key");
    mac.update(&to_be4(label.len()));
    mac.update(label);
    for part in parts {
        mac.update(&to_be4(part.len()));
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// One sealed entry in a host's user index: a username encrypted under an
/// index key only the password holder can derive.
///
/// The nonce is derived from the username, making the encryption
/// deterministic: creating the same user twice yields byte-identical
/// entries (the host deduplicates by equality), and `delete` can name the
/// exact entry to remove without the host ever seeing a username.
#[derive(Clone, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct IndexEntry(#[serde(with = "bytes")] Vec<u8>);

const INDEX_KEY_CONTEXT: &[u8] = b"sphinx index key";

impl IndexEntry {
    pub fn seal(hardened_secret: &sphinx_oprf::Output, user: &str) -> Self {
        let key = derive_key(hardened_secret, INDEX_KEY_CONTEXT);

        let nonce_mac: [u8; 32] = <Blake2sMac256 as Mac>::new_from_slice(&key)
            .expect("fixed-size key")
            .chain_update(user.as_bytes())
            .finalize()
            .into_bytes()
            .into();
        let nonce: [u8; 12] = nonce_mac[..12].try_into().unwrap();

        let mut sealed = ChaCha20Poly1305::new(Key::from_slice(&key))
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: user.as_bytes(),
                    aad: &[],
                },
            )
            .expect("index entry encryption failed");

        let mut entry = nonce.to_vec();
        entry.append(&mut sealed);
        Self(entry)
    }

    /// Returns the username, or `None` for an entry sealed under a
    /// different key (e.g. another master password sharing the index id,
    /// which cannot happen short of a hash collision) or corrupted data.
    pub fn open(&self, hardened_secret: &sphinx_oprf::Output) -> Option<String> {
        if self.0.len() < 12 {
            return None;
        }
        let key = derive_key(hardened_secret, INDEX_KEY_CONTEXT);
        let (nonce, ciphertext) = self.0.split_at(12);
        let plaintext = ChaCha20Poly1305::new(Key::from_slice(&key))
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}

impl Debug for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IndexEntry").finish()
    }
}

/// Identifies one in-flight authenticated session at the host. Chosen
/// randomly by the client, meaningful only until the session's single
/// operation completes.
#[derive(Clone, Copy, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SessionId(#[serde(with = "bytes")] pub [u8; 16]);

impl SessionId {
    pub fn new_random<Rng: RngCore + CryptoRng + Send>(rng: &mut Rng) -> Self {
        let mut id = [0u8; 16];
        rng.fill_bytes(&mut id);
        Self(id)
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", hex::encode(self.0))
    }
}

/// Ciphertext the host stores or relays without being able to read it.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct EncryptedBlob(#[serde(with = "bytes")] pub Vec<u8>);

impl Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedBlob").finish_non_exhaustive()
    }
}

/// One version of a record's payload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Version {
    pub payload: EncryptedBlob,
    pub tag: u64,
}

/// The unit the host persists per blinded identifier: the authentication
/// record plus the current version and, mid-change, at most one pending
/// version.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StoredRecord {
    pub auth: sphinx_pake::AuthRecord,
    pub current: Version,
    pub pending: Option<Version>,
}
