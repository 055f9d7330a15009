use sphinx_host_api::requests::{ClientRequest, ClientResponse, ListUsersRequest, ListUsersResponse};
use sphinx_host_api::rpc::Transport;
use sphinx_host_api::types::IndexId;

use crate::request;
use crate::{Client, MasterPassword, OperationError};

impl<T: Transport> Client<T> {
    pub(crate) async fn perform_list(
        &self,
        password: &MasterPassword,
        host: &str,
    ) -> Result<Option<String>, OperationError> {
        let access_key = self.access_key(password, host)?;
        let rwd = request::hardened_secret(&self.transport, &access_key).await?;
        let index_id = IndexId::derive(&rwd, host);

        let entries = match self
            .transport
            .send(ClientRequest::ListUsers(ListUsersRequest { index_id }))
            .await?
        {
            ClientResponse::ListUsers(ListUsersResponse::Ok { entries }) => entries,
            ClientResponse::ListUsers(ListUsersResponse::NotFound) => return Ok(None),
            ClientResponse::Unavailable => return Err(OperationError::Unavailable),
            _ => return Err(OperationError::Protocol),
        };

        let mut users = Vec::with_capacity(entries.len());
        for entry in &entries {
            // Entries under this index id were sealed with this key, so a
            // failure here means corruption at the host.
            let user = entry.open(&rwd).ok_or(OperationError::Protocol)?;
            users.push(user);
        }
        users.sort();
        Ok(Some(users.join("\n")))
    }
}
