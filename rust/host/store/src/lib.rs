//! The SPHINX storage host: evaluates OPRF requests under its long-term
//! key and drives the record state machine over an injected [`RecordStore`].
//!
//! Requests are handled serially through `&mut self`; the at-most-one
//! pending version rule is the only concurrency guard the protocol needs.
//! Every mutating transition is applied with a single store write, so a
//! client that disconnects mid-operation leaves the record untouched.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::PathBuf;

use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sphinx_host_api::requests::{
    ClientRequest, ClientResponse, CreateRequest, CreateResponse, ListUsersRequest,
    ListUsersResponse, Login1Request, Login1Response, Login2Request, Login2Response, Operation,
    OperationResult, OprfRequest, OprfResponse, SessionCipher,
};
use sphinx_host_api::rpc::TransportError;
use sphinx_host_api::types::{RecordId, SessionId, StoredRecord, Version};

mod store;

pub use store::{FileStore, MemoryStore, RecordStore, StoreError};

/// Sessions a host will keep half-open before it starts dropping the
/// oldest. A well-behaved client completes each session with the very next
/// request.
const MAX_PENDING_SESSIONS: usize = 128;

/// Host configuration, loadable from JSON.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HostConfig {
    /// Directory holding the long-term key, records, and user indexes.
    pub data_dir: PathBuf,
}

impl HostConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

struct PendingSession {
    record_id: RecordId,
    login: sphinx_pake::ServerLogin,
}

pub struct Host<S: RecordStore> {
    oprf_key: sphinx_oprf::PrivateKey,
    store: S,
    sessions: HashMap<SessionId, PendingSession>,
    session_order: VecDeque<SessionId>,
}

impl Host<FileStore> {
    /// Opens a host over a file-backed store, provisioning the long-term
    /// key on first use. The key never leaves the data directory.
    pub fn open(config: &HostConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir)?;
        let key_path = config.data_dir.join("host.key");
        let oprf_key = match fs::read(&key_path) {
            Ok(bytes) => sphinx_marshalling::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(e.0))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let key = sphinx_oprf::PrivateKey::new_random(&mut OsRng);
                let bytes = sphinx_marshalling::to_vec(&key)?;
                let tmp = key_path.with_extension("tmp");
                fs::write(&tmp, bytes)?;
                fs::rename(&tmp, &key_path)?;
                key
            }
            Err(err) => return Err(err.into()),
        };
        let store = FileStore::open(&config.data_dir)?;
        Ok(Self::new(oprf_key, store))
    }
}

impl<S: RecordStore> Host<S> {
    pub fn new(oprf_key: sphinx_oprf::PrivateKey, store: S) -> Self {
        Self {
            oprf_key,
            store,
            sessions: HashMap::new(),
            session_order: VecDeque::new(),
        }
    }

    /// Entry point for a transport carrying length-delimited CBOR messages.
    pub fn handle_bytes(&mut self, request: &[u8]) -> Vec<u8> {
        let response = match sphinx_marshalling::from_slice(request) {
            Ok(request) => self.handle(request),
            Err(_) => ClientResponse::DecodingError,
        };
        sphinx_marshalling::to_vec(&response).expect("response serialization failed")
    }

    pub fn handle(&mut self, request: ClientRequest) -> ClientResponse {
        match request {
            ClientRequest::Oprf(r) => ClientResponse::Oprf(self.handle_oprf(r)),
            ClientRequest::Create(r) => match self.handle_create(r) {
                Ok(response) => ClientResponse::Create(response),
                Err(err) => Self::unavailable(err),
            },
            ClientRequest::Login1(r) => match self.handle_login1(r) {
                Ok(response) => ClientResponse::Login1(response),
                Err(err) => Self::unavailable(err),
            },
            ClientRequest::Login2(r) => match self.handle_login2(r) {
                Ok(response) => response,
                Err(err) => Self::unavailable(err),
            },
            ClientRequest::ListUsers(r) => match self.handle_list_users(r) {
                Ok(response) => ClientResponse::ListUsers(response),
                Err(err) => Self::unavailable(err),
            },
        }
    }

    fn unavailable(err: StoreError) -> ClientResponse {
        warn!(%err, "record store failure");
        ClientResponse::Unavailable
    }

    fn handle_oprf(&self, request: OprfRequest) -> OprfResponse {
        OprfResponse {
            blinded_result: sphinx_oprf::blind_evaluate(&self.oprf_key, &request.blinded_input),
        }
    }

    fn handle_create(&mut self, request: CreateRequest) -> Result<CreateResponse, StoreError> {
        if self.store.get_record(&request.record_id)?.is_some() {
            debug!(record = ?request.record_id, "create on existing record");
            return Ok(CreateResponse::AlreadyRegistered);
        }

        let record = StoredRecord {
            auth: request.auth,
            current: Version {
                payload: request.current,
                tag: 1,
            },
            pending: None,
        };
        self.store.put_record(&request.record_id, &record)?;
        if let Some(index) = &request.index {
            self.store.add_index_entry(&index.index_id, &index.entry)?;
        }
        debug!(record = ?request.record_id, "record created");
        Ok(CreateResponse::Ok)
    }

    fn handle_login1(&mut self, request: Login1Request) -> Result<Login1Response, StoreError> {
        let Some(record) = self.store.get_record(&request.record_id)? else {
            debug!(record = ?request.record_id, "login for absent record");
            return Ok(Login1Response::NotFound);
        };

        let (login, response) =
            sphinx_pake::ServerLogin::respond(&record.auth, &request.login, &mut OsRng);

        if self.sessions.len() >= MAX_PENDING_SESSIONS {
            if let Some(oldest) = self.session_order.pop_front() {
                self.sessions.remove(&oldest);
            }
        }
        self.sessions.insert(
            request.session_id,
            PendingSession {
                record_id: request.record_id,
                login,
            },
        );
        self.session_order.push_back(request.session_id);

        Ok(Login1Response::Ok { login: response })
    }

    fn handle_login2(&mut self, request: Login2Request) -> Result<ClientResponse, StoreError> {
        // Sessions authenticate exactly one operation; take it out of the
        // table before doing anything else.
        let Some(session) = self.sessions.remove(&request.session_id) else {
            return Ok(ClientResponse::Login2(Login2Response::MissingSession));
        };
        self.session_order.retain(|id| *id != request.session_id);

        if session.record_id != request.record_id {
            warn!(session = ?request.session_id, "operation for foreign record id");
            return Ok(ClientResponse::Login2(Login2Response::AuthorizationMismatch));
        }

        let session_key = match session.login.finish(&request.confirmation) {
            Ok(key) => key,
            Err(_) => {
                // Reported identically to an absent record so the exchange
                // is no dictionary oracle.
                debug!(record = ?request.record_id, "key confirmation failed");
                return Ok(ClientResponse::Login2(Login2Response::NotFound));
            }
        };

        let cipher = SessionCipher::new(&session_key);
        let Ok(operation) = cipher.open_operation(&request.ciphertext) else {
            return Ok(ClientResponse::DecodingError);
        };

        // The record existed at Login1 but may have been deleted since.
        let Some(record) = self.store.get_record(&request.record_id)? else {
            return Ok(ClientResponse::Login2(Login2Response::NotFound));
        };

        let result = self.apply(&request.record_id, record, operation)?;
        Ok(ClientResponse::Login2(Login2Response::Ok {
            ciphertext: cipher.seal_result(&result),
        }))
    }

    /// The record state machine. Each arm performs at most one store write.
    fn apply(
        &mut self,
        record_id: &RecordId,
        mut record: StoredRecord,
        operation: Operation,
    ) -> Result<OperationResult, StoreError> {
        match operation {
            Operation::Get | Operation::Read => {
                Ok(OperationResult::Payload(record.current.payload))
            }
            Operation::Change { pending } => {
                if record.pending.is_some() {
                    debug!(record = ?record_id, "change while a version is pending");
                    return Ok(OperationResult::Nothing);
                }
                record.pending = Some(Version {
                    payload: pending,
                    tag: record.current.tag + 1,
                });
                self.store.put_record(record_id, &record)?;
                Ok(OperationResult::Done)
            }
            Operation::Commit => match record.pending.take() {
                Some(pending) => {
                    record.current = pending;
                    self.store.put_record(record_id, &record)?;
                    Ok(OperationResult::Payload(record.current.payload))
                }
                None => Ok(OperationResult::Nothing),
            },
            Operation::Undo => match record.pending.take() {
                Some(_) => {
                    self.store.put_record(record_id, &record)?;
                    Ok(OperationResult::Payload(record.current.payload))
                }
                None => Ok(OperationResult::Nothing),
            },
            Operation::Delete { index } => {
                self.store.delete_record(record_id)?;
                if let Some(index) = index {
                    self.store
                        .remove_index_entry(&index.index_id, &index.entry)?;
                }
                debug!(record = ?record_id, "record deleted");
                Ok(OperationResult::Done)
            }
            Operation::Write { payload } => {
                record.current = Version {
                    payload,
                    tag: record.current.tag + 1,
                };
                record.pending = None;
                self.store.put_record(record_id, &record)?;
                Ok(OperationResult::Done)
            }
        }
    }

    fn handle_list_users(
        &mut self,
        request: ListUsersRequest,
    ) -> Result<ListUsersResponse, StoreError> {
        match self.store.index_entries(&request.index_id)? {
            Some(entries) => Ok(ListUsersResponse::Ok { entries }),
            None => Ok(ListUsersResponse::NotFound),
        }
    }
}

/// Runs a host inside the client process. Useful for tests and for
/// single-machine deployments where the "network" is a function call.
pub struct InProcessTransport<S: RecordStore> {
    host: tokio::sync::Mutex<Host<S>>,
}

impl<S: RecordStore> InProcessTransport<S> {
    pub fn new(host: Host<S>) -> Self {
        Self {
            host: tokio::sync::Mutex::new(host),
        }
    }
}

#[async_trait::async_trait]
impl<S: RecordStore> sphinx_host_api::rpc::Transport for InProcessTransport<S> {
    async fn send(&self, request: ClientRequest) -> Result<ClientResponse, TransportError> {
        Ok(self.host.lock().await.handle(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use sphinx_host_api::requests::IndexUpdate;
    use sphinx_host_api::types::{EncryptedBlob, IndexEntry, IndexId};
    use sphinx_pake::ClientLogin;

    const PASSWORD: &[u8] = b"asdf";

    fn test_host() -> Host<MemoryStore> {
        Host::new(
            sphinx_oprf::PrivateKey::new_random(&mut OsRng),
            MemoryStore::new(),
        )
    }

    fn run_oprf(host: &mut Host<MemoryStore>, password: &[u8]) -> sphinx_oprf::Output {
        let (blinding_factor, blinded_input) = sphinx_oprf::start(password, &mut OsRng);
        match host.handle(ClientRequest::Oprf(OprfRequest { blinded_input })) {
            ClientResponse::Oprf(OprfResponse { blinded_result }) => {
                sphinx_oprf::finish(password, &blinding_factor, &blinded_result)
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    fn create(
        host: &mut Host<MemoryStore>,
        record_id: RecordId,
        payload: &[u8],
        index: Option<IndexUpdate>,
    ) -> CreateResponse {
        let request = CreateRequest {
            record_id,
            auth: sphinx_pake::register(PASSWORD, b"", &mut OsRng),
            current: EncryptedBlob(payload.to_vec()),
            index,
        };
        match host.handle(ClientRequest::Create(request)) {
            ClientResponse::Create(response) => response,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    struct OpenSession {
        session_id: SessionId,
        cipher: SessionCipher,
        confirmation: sphinx_pake::Confirmation,
    }

    fn open_session(
        host: &mut Host<MemoryStore>,
        record_id: RecordId,
        password: &[u8],
    ) -> Option<OpenSession> {
        let session_id = SessionId::new_random(&mut OsRng);
        let (client, login) = ClientLogin::start(password, &mut OsRng);
        let response = match host.handle(ClientRequest::Login1(Login1Request {
            session_id,
            record_id,
            login,
        })) {
            ClientResponse::Login1(Login1Response::Ok { login }) => login,
            ClientResponse::Login1(Login1Response::NotFound) => return None,
            other => panic!("unexpected response: {other:?}"),
        };
        let outcome = client.finish(&response).ok()?;
        Some(OpenSession {
            session_id,
            cipher: SessionCipher::new(&outcome.session_key),
            confirmation: outcome.confirmation,
        })
    }

    fn execute(
        host: &mut Host<MemoryStore>,
        record_id: RecordId,
        operation: Operation,
    ) -> OperationResult {
        let session = open_session(host, record_id, PASSWORD).expect("login failed");
        let response = host.handle(ClientRequest::Login2(Login2Request {
            session_id: session.session_id,
            record_id,
            confirmation: session.confirmation,
            ciphertext: session.cipher.seal_operation(&operation),
        }));
        match response {
            ClientResponse::Login2(Login2Response::Ok { ciphertext }) => {
                session.cipher.open_result(&ciphertext).unwrap()
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    fn payload(result: OperationResult) -> Vec<u8> {
        match result {
            OperationResult::Payload(EncryptedBlob(bytes)) => bytes,
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn test_create_and_get() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        assert!(matches!(
            create(&mut host, id, b"v1", None),
            CreateResponse::Ok
        ));
        assert_eq!(payload(execute(&mut host, id, Operation::Get)), b"v1");
    }

    #[test]
    fn test_create_twice_already_registered() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"v1", None);
        assert!(matches!(
            create(&mut host, id, b"v2", None),
            CreateResponse::AlreadyRegistered
        ));
        // The original record is untouched.
        assert_eq!(payload(execute(&mut host, id, Operation::Get)), b"v1");
    }

    #[test]
    fn test_login_for_absent_record() {
        let mut host = test_host();
        assert!(open_session(&mut host, RecordId([9; 32]), PASSWORD).is_none());
    }

    #[test]
    fn test_login_with_wrong_password() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"v1", None);
        // The transcript completes; only envelope opening fails, client side.
        assert!(open_session(&mut host, id, b"wrong").is_none());
    }

    #[test]
    fn test_change_commit_lifecycle() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"v1", None);

        let change = Operation::Change {
            pending: EncryptedBlob(b"v2".to_vec()),
        };
        assert!(matches!(
            execute(&mut host, id, change.clone()),
            OperationResult::Done
        ));
        // Current is untouched until commit.
        assert_eq!(payload(execute(&mut host, id, Operation::Get)), b"v1");
        // A second change while one is pending is refused.
        assert!(matches!(
            execute(&mut host, id, change),
            OperationResult::Nothing
        ));

        assert_eq!(payload(execute(&mut host, id, Operation::Commit)), b"v2");
        assert_eq!(payload(execute(&mut host, id, Operation::Get)), b"v2");
        // Double commit: nothing left to promote.
        assert!(matches!(
            execute(&mut host, id, Operation::Commit),
            OperationResult::Nothing
        ));
    }

    #[test]
    fn test_undo_lifecycle() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"v1", None);
        execute(
            &mut host,
            id,
            Operation::Change {
                pending: EncryptedBlob(b"v2".to_vec()),
            },
        );
        assert_eq!(payload(execute(&mut host, id, Operation::Undo)), b"v1");
        assert!(matches!(
            execute(&mut host, id, Operation::Undo),
            OperationResult::Nothing
        ));
        assert_eq!(payload(execute(&mut host, id, Operation::Get)), b"v1");
    }

    #[test]
    fn test_write_overwrites_in_place() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"blob-1", None);
        execute(
            &mut host,
            id,
            Operation::Write {
                payload: EncryptedBlob(b"blob-2".to_vec()),
            },
        );
        assert_eq!(payload(execute(&mut host, id, Operation::Read)), b"blob-2");
    }

    #[test]
    fn test_delete_removes_record_and_index_entry() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        let index_id = IndexId([2; 32]);
        let rwd = {
            let key = sphinx_oprf::PrivateKey::new_random(&mut OsRng);
            sphinx_oprf::unoblivious_evaluate(&key, PASSWORD)
        };
        let entry = IndexEntry::seal(&rwd, "user1");
        create(
            &mut host,
            id,
            b"v1",
            Some(IndexUpdate {
                index_id,
                entry: entry.clone(),
            }),
        );

        execute(
            &mut host,
            id,
            Operation::Delete {
                index: Some(IndexUpdate { index_id, entry }),
            },
        );
        assert!(open_session(&mut host, id, PASSWORD).is_none());
        assert!(matches!(
            host.handle(ClientRequest::ListUsers(ListUsersRequest { index_id })),
            ClientResponse::ListUsers(ListUsersResponse::NotFound)
        ));
    }

    #[test]
    fn test_list_users_returns_entries() {
        let mut host = test_host();
        let index_id = IndexId([2; 32]);
        let rwd = {
            let key = sphinx_oprf::PrivateKey::new_random(&mut OsRng);
            sphinx_oprf::unoblivious_evaluate(&key, PASSWORD)
        };
        let entry = IndexEntry::seal(&rwd, "user1");
        create(
            &mut host,
            RecordId([1; 32]),
            b"v1",
            Some(IndexUpdate {
                index_id,
                entry: entry.clone(),
            }),
        );
        match host.handle(ClientRequest::ListUsers(ListUsersRequest { index_id })) {
            ClientResponse::ListUsers(ListUsersResponse::Ok { entries }) => {
                assert_eq!(entries, vec![entry]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_missing_session() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"v1", None);
        let session = open_session(&mut host, id, PASSWORD).unwrap();
        let response = host.handle(ClientRequest::Login2(Login2Request {
            session_id: SessionId::new_random(&mut OsRng),
            record_id: id,
            confirmation: session.confirmation,
            ciphertext: session.cipher.seal_operation(&Operation::Get),
        }));
        assert!(matches!(
            response,
            ClientResponse::Login2(Login2Response::MissingSession)
        ));
    }

    #[test]
    fn test_session_is_single_use() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"v1", None);
        let session = open_session(&mut host, id, PASSWORD).unwrap();
        let request = Login2Request {
            session_id: session.session_id,
            record_id: id,
            confirmation: session.confirmation,
            ciphertext: session.cipher.seal_operation(&Operation::Get),
        };
        assert!(matches!(
            host.handle(ClientRequest::Login2(request.clone())),
            ClientResponse::Login2(Login2Response::Ok { .. })
        ));
        assert!(matches!(
            host.handle(ClientRequest::Login2(request)),
            ClientResponse::Login2(Login2Response::MissingSession)
        ));
    }

    #[test]
    fn test_authorization_mismatch() {
        let mut host = test_host();
        let id_a = RecordId([1; 32]);
        let id_b = RecordId([2; 32]);
        create(&mut host, id_a, b"a", None);
        create(&mut host, id_b, b"b", None);

        let session = open_session(&mut host, id_a, PASSWORD).unwrap();
        let response = host.handle(ClientRequest::Login2(Login2Request {
            session_id: session.session_id,
            record_id: id_b,
            confirmation: session.confirmation,
            ciphertext: session.cipher.seal_operation(&Operation::Get),
        }));
        assert!(matches!(
            response,
            ClientResponse::Login2(Login2Response::AuthorizationMismatch)
        ));
    }

    #[test]
    fn test_forged_confirmation_reported_as_not_found() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"v1", None);

        let good = open_session(&mut host, id, PASSWORD).unwrap();
        let other = open_session(&mut host, id, PASSWORD).unwrap();
        // Confirmation from a different session is wrong for this one.
        let response = host.handle(ClientRequest::Login2(Login2Request {
            session_id: good.session_id,
            record_id: id,
            confirmation: other.confirmation,
            ciphertext: good.cipher.seal_operation(&Operation::Get),
        }));
        assert!(matches!(
            response,
            ClientResponse::Login2(Login2Response::NotFound)
        ));
    }

    #[test]
    fn test_handle_bytes_decoding_error() {
        let mut host = test_host();
        let response = host.handle_bytes(b"not cbor");
        assert!(matches!(
            sphinx_marshalling::from_slice(&response).unwrap(),
            ClientResponse::DecodingError
        ));
    }

    #[test]
    fn test_pending_session_eviction() {
        let mut host = test_host();
        let id = RecordId([1; 32]);
        create(&mut host, id, b"v1", None);

        let first = open_session(&mut host, id, PASSWORD).unwrap();
        for _ in 0..MAX_PENDING_SESSIONS {
            open_session(&mut host, id, PASSWORD).unwrap();
        }
        let response = host.handle(ClientRequest::Login2(Login2Request {
            session_id: first.session_id,
            record_id: id,
            confirmation: first.confirmation,
            ciphertext: first.cipher.seal_operation(&Operation::Get),
        }));
        assert!(matches!(
            response,
            ClientResponse::Login2(Login2Response::MissingSession)
        ));
    }
}
