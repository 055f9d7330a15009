//! Client SDK for the SPHINX password store.
//!
//! The client never stores anything locally and never sends anything a host
//! could use to learn the master password, a site password, or even which
//! user and host a record belongs to. Every operation starts from the
//! master password and reconstructs the rest.

use tracing::instrument;

use password::AccessKey;
use request::RequestError;

mod blob;
mod change;
mod create;
mod delete;
mod get;
mod list;
mod password;
mod payload;
mod request;
mod rules;

pub use create::CreateError;
pub use password::{MasterPassword, PasswordHashingMode};
pub use rules::{RuleError, RuleSpec, MAX_LENGTH};
pub use sphinx_host_api::rpc::{Transport, TransportError};

/// Error type for all operations on existing records.
#[derive(Debug)]
pub enum OperationError {
    /// A transport error in speaking with the host.
    Transport(TransportError),
    /// The host could not access its record store. Try again later.
    Unavailable,
    /// The host answered outside the protocol, or returned data that fails
    /// to authenticate or decode.
    Protocol,
    /// A software fault on the client.
    Assertion,
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Unavailable => write!(f, "host record store unavailable"),
            Self::Protocol => write!(f, "host broke protocol"),
            Self::Assertion => write!(f, "client software fault"),
        }
    }
}

impl std::error::Error for OperationError {}

impl From<RequestError> for OperationError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Transport(err) => Self::Transport(err),
            RequestError::Protocol => Self::Protocol,
            RequestError::Unavailable => Self::Unavailable,
            RequestError::Assertion => Self::Assertion,
        }
    }
}

impl From<TransportError> for OperationError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// A password store client bound to one host transport.
pub struct Client<T: Transport> {
    transport: T,
    hashing_mode: PasswordHashingMode,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, hashing_mode: PasswordHashingMode) -> Self {
        Self {
            transport,
            hashing_mode,
        }
    }

    /// Registers a record for (user, host) and returns the generated site
    /// password, or `Ok(None)` if a record already exists there.
    ///
    /// The rule spec is validated before anything is sent.
    #[instrument(level = "trace", skip(self, password))]
    pub async fn create(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
        classes: &str,
        length: u32,
    ) -> Result<Option<String>, CreateError> {
        self.perform_create(password, user, host, classes, length)
            .await
    }

    /// Recomputes the current site password for (user, host). `Ok(None)`
    /// if no such record exists or the master password is wrong.
    #[instrument(level = "trace", skip(self, password))]
    pub async fn get(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        self.perform_get(password, user, host).await
    }

    /// Stages a fresh site password under the record's existing rules and
    /// returns it. The current password stays in effect until [`commit`].
    /// `Ok(None)` if the record is absent or a staged version already
    /// exists.
    ///
    /// [`commit`]: Client::commit
    #[instrument(level = "trace", skip(self, password))]
    pub async fn change(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        self.perform_change(password, user, host).await
    }

    /// Promotes the staged site password and returns it. `Ok(None)` when
    /// nothing is staged, so committing twice is harmless.
    #[instrument(level = "trace", skip(self, password))]
    pub async fn commit(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        self.perform_commit(password, user, host).await
    }

    /// Discards the staged site password and returns the one still in
    /// effect. `Ok(None)` when nothing is staged.
    #[instrument(level = "trace", skip(self, password))]
    pub async fn undo(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        self.perform_undo(password, user, host).await
    }

    /// Deletes the record and its user-index entry. `Ok(false)` if there
    /// was nothing to delete.
    #[instrument(level = "trace", skip(self, password))]
    pub async fn delete(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<bool, OperationError> {
        self.perform_delete(password, user, host).await
    }

    /// Stores an opaque blob at (user, host), creating the record on first
    /// write and overwriting in place afterwards. `Ok(false)` if a blob
    /// record exists but this master password cannot open it.
    #[instrument(level = "trace", skip(self, password, payload))]
    pub async fn write(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
        payload: &[u8],
    ) -> Result<bool, OperationError> {
        self.perform_write(password, user, host, payload).await
    }

    /// Fetches the blob stored at (user, host), or `Ok(None)` if absent.
    #[instrument(level = "trace", skip(self, password))]
    pub async fn read(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<Vec<u8>>, OperationError> {
        self.perform_read(password, user, host).await
    }

    /// Lists the usernames registered at a host under this master
    /// password, sorted and newline-joined. `Ok(None)` if there are none.
    #[instrument(level = "trace", skip(self, password))]
    pub async fn list(
        &self,
        password: &MasterPassword,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        self.perform_list(password, host).await
    }

    fn access_key(
        &self,
        password: &MasterPassword,
        host: &str,
    ) -> Result<AccessKey, RequestError> {
        password
            .access_key(self.hashing_mode, host)
            .ok_or(RequestError::Assertion)
    }
}
