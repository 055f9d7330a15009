//! Shared protocol surface between the SPHINX client and a storage host:
//! wire message grammar, identifier derivation, record containers, and the
//! transport seam.

pub mod requests;
pub mod rpc;
pub mod types;

pub use requests::{
    ClientRequest, ClientResponse, CreateRequest, CreateResponse, IndexUpdate, ListUsersRequest,
    ListUsersResponse, Login1Request, Login1Response, Login2Request, Login2Response, Operation,
    OperationResult, OprfRequest, OprfResponse, SessionCipher, SessionCipherError,
};
pub use rpc::{Transport, TransportError};
pub use types::{
    EncryptedBlob, IndexEntry, IndexId, RecordDomain, RecordId, SecretBytesArray, SecretBytesVec,
    SessionId, StoredRecord, Version,
};
