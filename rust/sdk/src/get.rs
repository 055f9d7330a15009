use sphinx_host_api::requests::{Operation, OperationResult};
use sphinx_host_api::rpc::Transport;
use sphinx_host_api::types::{RecordDomain, RecordId};

use crate::payload::{password_seed, RecordPayload};
use crate::request;
use crate::rules::RuleSpec;
use crate::{Client, MasterPassword, OperationError};

impl<T: Transport> Client<T> {
    pub(crate) async fn perform_get(
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

        match request::execute(&self.transport, session, &Operation::Get).await? {
            Some(OperationResult::Payload(blob)) => {
                let (salt, spec) = derived_password_params(&blob, &rwd)?;
                Ok(Some(spec.derive(&password_seed(&rwd, &salt))))
            }
            None => Ok(None),
            _ => Err(OperationError::Protocol),
        }
    }
}

/// Opens a payload that must be a generated-password record and revalidates
/// its policy. Anything else in this namespace means the host returned the
/// wrong record.
pub(crate) fn derived_password_params(
    blob: &sphinx_host_api::types::EncryptedBlob,
    rwd: &sphinx_oprf::Output,
) -> Result<([u8; 32], RuleSpec), OperationError> {
    match RecordPayload::open(blob, rwd) {
        Ok(RecordPayload::DerivedPassword {
            salt,
            classes,
            length,
        }) => {
            let spec =
                RuleSpec::parse(&classes, length).map_err(|_| OperationError::Protocol)?;
            Ok((salt, spec))
        }
        _ => Err(OperationError::Protocol),
    }
}
