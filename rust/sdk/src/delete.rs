use sphinx_host_api::requests::{IndexUpdate, Operation, OperationResult};
use sphinx_host_api::rpc::Transport;
use sphinx_host_api::types::{IndexEntry, IndexId, RecordDomain, RecordId};

use crate::request;
use crate::{Client, MasterPassword, OperationError};

impl<T: Transport> Client<T> {
    pub(crate) async fn perform_delete(
        &self,
        password: &MasterPassword,
        user: &str,
        host: &str,
    ) -> Result<bool, OperationError> {
        let access_key = self.access_key(password, host)?;
        let rwd = request::hardened_secret(&self.transport, &access_key).await?;
        let record_id = RecordId::derive(&rwd, user, host, RecordDomain::Password);

        let Some(session) = request::open_session(&self.transport, record_id, &access_key).await?
        else {
            return Ok(false);
        };

        // The sealed entry is deterministic, so it names exactly the index
        // entry `create` added.
        let operation = Operation::Delete {
            index: Some(IndexUpdate {
                index_id: IndexId::derive(&rwd, host),
                entry: IndexEntry::seal(&rwd, user),
            }),
        };
        match request::execute(&self.transport, session, &operation).await? {
            Some(OperationResult::Done) => Ok(true),
            // Already gone by the time the session completed.
            None => Ok(false),
            _ => Err(OperationError::Protocol),
        }
    }
}
