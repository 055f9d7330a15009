//! Shared protocol plumbing for the client operations: the OPRF exchange
//! that recovers the hardened secret and the two-message authenticated
//! session that carries exactly one sealed operation.

use rand_core::OsRng;
use sphinx_host_api::requests::{
    ClientRequest, ClientResponse, Login1Request, Login1Response, Login2Request, Login2Response,
    Operation, OperationResult, OprfRequest, SessionCipher,
};
use sphinx_host_api::rpc::{Transport, TransportError};
use sphinx_host_api::types::{RecordId, SessionId};
use sphinx_pake::ClientLogin;

use crate::password::AccessKey;

/// Internal failure modes shared by every operation; each operation maps
/// these into its public error type.
#[derive(Debug)]
pub(crate) enum RequestError {
    /// A lower-level network or transport error.
    Transport(TransportError),
    /// The host answered with something the protocol does not allow at
    /// this point, or with data that fails to decode.
    Protocol,
    /// The host could not access its record store.
    Unavailable,
    /// A local fault, such as password hashing failing.
    Assertion,
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// Runs the OPRF exchange with the host, turning the access key into the
/// hardened secret everything else derives from.
pub(crate) async fn hardened_secret<T: Transport>(
    transport: &T,
    access_key: &AccessKey,
) -> Result<sphinx_oprf::Output, RequestError> {
    let (blinding_factor, blinded_input) =
        sphinx_oprf::start(access_key.expose_secret(), &mut OsRng);
    match transport
        .send(ClientRequest::Oprf(OprfRequest { blinded_input }))
        .await?
    {
        ClientResponse::Oprf(response) => Ok(sphinx_oprf::finish(
            access_key.expose_secret(),
            &blinding_factor,
            &response.blinded_result,
        )),
        ClientResponse::Unavailable => Err(RequestError::Unavailable),
        _ => Err(RequestError::Protocol),
    }
}

/// An authenticated session ready to carry one operation.
pub(crate) struct Session {
    session_id: SessionId,
    record_id: RecordId,
    cipher: SessionCipher,
    confirmation: sphinx_pake::Confirmation,
}

/// Opens a session against a record. `Ok(None)` means the record does not
/// exist, or the password does not match it; the two are deliberately
/// indistinguishable.
pub(crate) async fn open_session<T: Transport>(
    transport: &T,
    record_id: RecordId,
    access_key: &AccessKey,
) -> Result<Option<Session>, RequestError> {
    let session_id = SessionId::new_random(&mut OsRng);
    let (client, login) = ClientLogin::start(access_key.expose_secret(), &mut OsRng);

    let response = match transport
        .send(ClientRequest::Login1(Login1Request {
            session_id,
            record_id,
            login,
        }))
        .await?
    {
        ClientResponse::Login1(Login1Response::Ok { login }) => login,
        ClientResponse::Login1(Login1Response::NotFound) => return Ok(None),
        ClientResponse::Unavailable => return Err(RequestError::Unavailable),
        _ => return Err(RequestError::Protocol),
    };

    match client.finish(&response) {
        Ok(outcome) => Ok(Some(Session {
            session_id,
            record_id,
            cipher: SessionCipher::new(&outcome.session_key),
            confirmation: outcome.confirmation,
        })),
        // A wrong password surfaces here, as an envelope that will not
        // open. Reported as absence, like everywhere else.
        Err(sphinx_pake::PakeError::AuthenticationFailed) => Ok(None),
    }
}

/// Sends the session's one operation and opens the sealed result.
/// `Ok(None)` means the record disappeared between the session's two
/// messages; operations report that like any other absence.
pub(crate) async fn execute<T: Transport>(
    transport: &T,
    session: Session,
    operation: &Operation,
) -> Result<Option<OperationResult>, RequestError> {
    let response = transport
        .send(ClientRequest::Login2(Login2Request {
            session_id: session.session_id,
            record_id: session.record_id,
            confirmation: session.confirmation,
            ciphertext: session.cipher.seal_operation(operation),
        }))
        .await?;

    match response {
        ClientResponse::Login2(Login2Response::Ok { ciphertext }) => session
            .cipher
            .open_result(&ciphertext)
            .map(Some)
            .map_err(|_| RequestError::Protocol),
        ClientResponse::Login2(Login2Response::NotFound) => Ok(None),
        ClientResponse::Unavailable => Err(RequestError::Unavailable),
        _ => Err(RequestError::Protocol),
    }
}
