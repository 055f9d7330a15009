use rand_core::{OsRng, RngCore};
use sphinx_host_api::requests::{ClientRequest, ClientResponse, CreateRequest, CreateResponse, IndexUpdate};
use sphinx_host_api::rpc::{Transport, TransportError};
use sphinx_host_api::types::{IndexEntry, IndexId, RecordDomain, RecordId};

use crate::payload::{password_seed, RecordPayload};
use crate::request::{self, RequestError};
use crate::rules::{RuleError, RuleSpec};
use crate::{Client, MasterPassword};

/// Error type for [`Client::create`].
#[derive(Debug)]
pub enum CreateError {
    /// The rule spec was rejected; nothing was sent to the host.
    InvalidRules(RuleError),
    /// A transport error in speaking with the host.
    Transport(TransportError),
    /// The host could not access its record store. Try again later.
    Unavailable,
    /// The host answered outside the protocol.
    Protocol,
    /// A software fault on the client.
    Assertion,
}

impl std::fmt::Display for CreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRules(err) => write!(f, "invalid rule spec: {err}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Unavailable => write!(f, "host record store unavailable"),
            Self::Protocol => write!(f, "host broke protocol"),
            Self::Assertion => write!(f, "client software fault"),
        }
    }
}

impl std::error::Error for CreateError {}

impl From<RequestError> for CreateError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Transport(err) => Self::Transport(err),
            RequestError::Protocol => Self::Protocol,
            RequestError::Unavailable => Self::Unavailable,
            RequestError::Assertion => Self::Assertion,
        }
    }
}

impl From<TransportError> for CreateError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl<T: Transport> Client<T> {
    pub(crate) async fn perform_create(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
        classes: &str,
        length: u32,
    ) -> Result<Option<String>, CreateError> {
        let spec = RuleSpec::parse(classes, length).map_err(CreateError::InvalidRules)?;

        let access_key = self.access_key(password, host)?;
        let rwd = request::hardened_secret(&self.transport, &access_key).await?;

        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        let payload = RecordPayload::DerivedPassword {
            salt,
            classes: spec.classes(),
            length: spec.length(),
        };

        let request = CreateRequest {
            record_id: RecordId::derive(&rwd, user, host, RecordDomain::Password),
            auth: sphinx_pake::register(access_key.expose_secret(), b"", &mut OsRng),
            current: payload.seal(&rwd, &mut OsRng),
            index: Some(IndexUpdate {
                index_id: IndexId::derive(&rwd, host),
                entry: IndexEntry::seal(&rwd, user),
            }),
        };

        match self.transport.send(ClientRequest::Create(request)).await? {
            ClientResponse::Create(CreateResponse::Ok) => {
                Ok(Some(spec.derive(&password_seed(&rwd, &salt))))
            }
            ClientResponse::Create(CreateResponse::AlreadyRegistered) => Ok(None),
            ClientResponse::Unavailable => Err(CreateError::Unavailable),
            _ => Err(CreateError::Protocol),
        }
    }
}
