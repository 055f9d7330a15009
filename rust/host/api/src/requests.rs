//! The request/response grammar between client and host.
//!
//! Every exchange is a tagged variant with a fixed CBOR layout, decoded by
//! exhaustive match. One client operation is either a single exchange
//! (OPRF evaluation, record creation, index fetch) or a session pair:
//! `Login1` opens an authenticated session bound to one record id, `Login2`
//! confirms the key and carries exactly one [`Operation`] encrypted under
//! the session key.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde::{Deserialize, Serialize};

use crate::types::{EncryptedBlob, IndexEntry, IndexId, RecordId, SessionId};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ClientRequest {
    Oprf(OprfRequest),
    Create(CreateRequest),
    Login1(Login1Request),
    Login2(Login2Request),
    ListUsers(ListUsersRequest),
}

#[derive(Debug, Deserialize, Serialize)]
#[allow(clippy::large_enum_variant)]
pub enum ClientResponse {
    Oprf(OprfResponse),
    Create(CreateResponse),
    Login1(Login1Response),
    Login2(Login2Response),
    ListUsers(ListUsersResponse),
    /// The host could not deserialize the request.
    DecodingError,
    /// The host's persistent store failed; the request may succeed later.
    Unavailable,
}

/// Evaluation of a blinded input under the host's long-term key. Touches no
/// record and needs no authentication.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OprfRequest {
    pub blinded_input: sphinx_oprf::BlindedInput,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OprfResponse {
    pub blinded_result: sphinx_oprf::BlindedResult,
}

/// First registration of a record: the authentication record, the first
/// version, and optionally a user-index entry, applied atomically.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateRequest {
    pub record_id: RecordId,
    pub auth: sphinx_pake::AuthRecord,
    pub current: EncryptedBlob,
    pub index: Option<IndexUpdate>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IndexUpdate {
    pub index_id: IndexId,
    pub entry: IndexEntry,
}

#[derive(Debug, Deserialize, Serialize)]
pub enum CreateResponse {
    Ok,
    AlreadyRegistered,
}

/// Opens an authenticated session scoped to `record_id`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Login1Request {
    pub session_id: SessionId,
    pub record_id: RecordId,
    pub login: sphinx_pake::LoginRequest,
}

#[derive(Debug, Deserialize, Serialize)]
pub enum Login1Response {
    Ok { login: sphinx_pake::LoginResponse },
    NotFound,
}

/// Completes the session and carries its single operation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Login2Request {
    pub session_id: SessionId,
    pub record_id: RecordId,
    pub confirmation: sphinx_pake::Confirmation,
    /// An [`Operation`], sealed with [`SessionCipher::seal_operation`].
    pub ciphertext: EncryptedBlob,
}

#[derive(Debug, Deserialize, Serialize)]
pub enum Login2Response {
    /// An [`OperationResult`], sealed with [`SessionCipher::seal_result`].
    Ok { ciphertext: EncryptedBlob },
    /// The record does not exist, or key confirmation failed. The two are
    /// deliberately indistinguishable so a failed password guess looks like
    /// a missing record.
    NotFound,
    /// The host no longer holds state for the request's session id.
    MissingSession,
    /// The session was established for a different record id.
    AuthorizationMismatch,
}

/// Fetches the sealed entries of one user index. Gated by knowledge of the
/// password-derived index id; the entries themselves are opaque to anyone
/// without the index key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ListUsersRequest {
    pub index_id: IndexId,
}

#[derive(Debug, Deserialize, Serialize)]
pub enum ListUsersResponse {
    Ok { entries: Vec<IndexEntry> },
    NotFound,
}

/// The record transition requested inside an authenticated session.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Operation {
    /// Return the current version's payload.
    Get,
    /// Install a pending version. Rejected (with [`OperationResult::Nothing`])
    /// if a pending version already exists.
    Change { pending: EncryptedBlob },
    /// Promote the pending version to current.
    Commit,
    /// Discard the pending version.
    Undo,
    /// Remove the record and, if given, its user-index entry.
    Delete { index: Option<IndexUpdate> },
    /// Replace the current payload in place. Raw blobs are not versioned.
    Write { payload: EncryptedBlob },
    /// Return the current payload without interpreting it.
    Read,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum OperationResult {
    /// A version payload (get, read, and the post-transition state after
    /// commit/undo).
    Payload(EncryptedBlob),
    /// The transition was applied (change, write, delete).
    Done,
    /// The operation legitimately found nothing to do: no pending version
    /// to commit or undo, or a change attempted while one is pending.
    Nothing,
}

#[derive(Debug, Eq, PartialEq)]
pub struct SessionCipherError;

impl core::fmt::Display for SessionCipherError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("session payload could not be opened")
    }
}

impl std::error::Error for SessionCipherError {}

// Fixed nonces are sound here: a session key encrypts exactly one message
// in each direction and is then discarded.
const OPERATION_NONCE: [u8; 12] = [1; 12];
const RESULT_NONCE: [u8; 12] = [2; 12];

/// Encrypts the operation and its result under the PAKE session key, one
/// fixed nonce per direction.
pub struct SessionCipher {
    cipher: ChaCha20Poly1305,
}

impl SessionCipher {
    pub fn new(session_key: &sphinx_pake::SessionKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(session_key.expose_secret())),
        }
    }

    pub fn seal_operation(&self, operation: &Operation) -> EncryptedBlob {
        self.seal(&OPERATION_NONCE, operation)
    }

    pub fn open_operation(&self, blob: &EncryptedBlob) -> Result<Operation, SessionCipherError> {
        self.open(&OPERATION_NONCE, blob)
    }

    pub fn seal_result(&self, result: &OperationResult) -> EncryptedBlob {
        self.seal(&RESULT_NONCE, result)
    }

    pub fn open_result(&self, blob: &EncryptedBlob) -> Result<OperationResult, SessionCipherError> {
        self.open(&RESULT_NONCE, blob)
    }

    fn seal<T: Serialize>(&self, nonce: &[u8; 12], value: &T) -> EncryptedBlob {
        let plaintext = sphinx_marshalling::to_vec(value).expect("serialization failed");
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &plaintext,
                    aad: &[],
                },
            )
            .expect("session encryption failed");
        EncryptedBlob(ciphertext)
    }

    fn open<T: serde::de::DeserializeOwned>(
        &self,
        nonce: &[u8; 12],
        blob: &EncryptedBlob,
    ) -> Result<T, SessionCipherError> {
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &blob.0,
                    aad: &[],
                },
            )
            .map_err(|_| SessionCipherError)?;
        sphinx_marshalling::from_slice(&plaintext).map_err(|_| SessionCipherError)
    }
}
