use rand_core::OsRng;
use sphinx_host_api::requests::{
    ClientRequest, ClientResponse, CreateRequest, CreateResponse, Operation, OperationResult,
};
use sphinx_host_api::rpc::Transport;
use sphinx_host_api::types::{RecordDomain, RecordId};

use crate::payload::RecordPayload;
use crate::request;
use crate::{Client, MasterPassword, OperationError};

impl<T: Transport> Client<T> {
    /// Blob records live in their own identifier namespace, so a blob and
    /// a generated password can coexist for the same (user, host).
    pub(crate) async fn perform_write(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
        payload: &[u8],
    ) -> Result<bool, OperationError> {
        let access_key = self.access_key(password, host)?;
        let rwd = request::hardened_secret(&self.transport, &access_key).await?;
        let record_id = RecordId::derive(&rwd, user, host, RecordDomain::Blob);
        let sealed = RecordPayload::Blob(payload.to_vec()).seal(&rwd, &mut OsRng);

        if let Some(session) =
            request::open_session(&self.transport, record_id, &access_key).await?
        {
            return match request::execute(
                &self.transport,
                session,
                &Operation::Write { payload: sealed },
            )
            .await?
            {
                Some(OperationResult::Done) => Ok(true),
                // Deleted mid-session; the caller can retry for a fresh
                // record.
                None => Ok(false),
                _ => Err(OperationError::Protocol),
            };
        }

        // No record yet; first write registers one. Blob records are not
        // listed in the user index.
        let create = CreateRequest {
            record_id,
            auth: sphinx_pake::register(access_key.expose_secret(), b"", &mut OsRng),
            current: sealed,
            index: None,
        };
        match self.transport.send(ClientRequest::Create(create)).await? {
            ClientResponse::Create(CreateResponse::Ok) => Ok(true),
            // The record exists but this master password cannot open it.
            ClientResponse::Create(CreateResponse::AlreadyRegistered) => Ok(false),
            ClientResponse::Unavailable => Err(OperationError::Unavailable),
            _ => Err(OperationError::Protocol),
        }
    }

    pub(crate) async fn perform_read(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<Vec<u8>>, OperationError> {
        let access_key = self.access_key(password, host)?;
        let rwd = request::hardened_secret(&self.transport, &access_key).await?;
        let record_id = RecordId::derive(&rwd, user, host, RecordDomain::Blob);

        let Some(session) = request::open_session(&self.transport, record_id, &access_key).await?
        else {
            return Ok(None);
        };
        match request::execute(&self.transport, session, &Operation::Read).await? {
            Some(OperationResult::Payload(blob)) => match RecordPayload::open(&blob, &rwd) {
                Ok(RecordPayload::Blob(bytes)) => Ok(Some(bytes)),
                _ => Err(OperationError::Protocol),
            },
            None => Ok(None),
            _ => Err(OperationError::Protocol),
        }
    }
}
