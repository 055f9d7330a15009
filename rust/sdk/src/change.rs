use rand_core::{OsRng, RngCore};
use sphinx_host_api::requests::{Operation, OperationResult};
use sphinx_host_api::rpc::Transport;
use sphinx_host_api::types::{RecordDomain, RecordId};

use crate::get::derived_password_params;
use crate::payload::{password_seed, RecordPayload};
use crate::request;
use crate::{Client, MasterPassword, OperationError};

impl<T: Transport> Client<T> {
    /// Two sessions: one to read the record's current policy, one to stage
    /// the new version under it.
    pub(crate) async fn perform_change(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        let access_key = self.access_key(password, host)?;
        let rwd = request::hardened_secret(&self.transport, &access_key).await?;
        let record_id = RecordId::derive(&rwd, user, host, RecordDomain::Password);

        let Some(session) = request::open_session(&self.transport, record_id, &access_key).await?
        else {
            return Ok(None);
        };
        let spec = match request::execute(&self.transport, session, &Operation::Get).await? {
            Some(OperationResult::Payload(blob)) => derived_password_params(&blob, &rwd)?.1,
            None => return Ok(None),
            _ => return Err(OperationError::Protocol),
        };

        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        let pending = RecordPayload::DerivedPassword {
            salt,
            classes: spec.classes(),
            length: spec.length(),
        }
        .seal(&rwd, &mut OsRng);

        let Some(session) = request::open_session(&self.transport, record_id, &access_key).await?
        else {
            // Deleted between the two sessions.
            return Ok(None);
        };
        match request::execute(&self.transport, session, &Operation::Change { pending }).await? {
            Some(OperationResult::Done) => Ok(Some(spec.derive(&password_seed(&rwd, &salt)))),
            // A version is already staged; commit or undo it first.
            Some(OperationResult::Nothing) | None => Ok(None),
            _ => Err(OperationError::Protocol),
        }
    }

    pub(crate) async fn perform_commit(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        self.promote(password, user, host, &Operation::Commit).await
    }

    pub(crate) async fn perform_undo(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        self.promote(password, user, host, &Operation::Undo).await
    }

    /// Commit and undo share a shape: apply the transition, then derive the
    /// password now in effect from the payload the host returns.
    async fn promote(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
        operation: &Operation,
    ) -> Result<Option<String>, OperationError> {
        let access_key = self.access_key(password, host)?;
        let rwd = request::hardened_secret(&self.transport, &access_key).await?;
        let record_id = RecordId::derive(&rwd, user, host, RecordDomain::Password);

        let Some(session) = request::open_session(&self.transport, record_id, &access_key).await?
        else {
            return Ok(None);
        };
        match request::execute(&self.transport, session, operation).await? {
            Some(OperationResult::Payload(blob)) => {
                let (salt, spec) = derived_password_params(&blob, &rwd)?;
                Ok(Some(spec.derive(&password_seed(&rwd, &salt))))
            }
            Some(OperationResult::Nothing) | None => Ok(None),
            _ => Err(OperationError::Protocol),
        }
    }
}
