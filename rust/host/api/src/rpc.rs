//! The transport seam between client and host.
//!
//! The core assumes an ordered, complete, confidential byte stream and
//! never opens sockets itself; implementations carry one length-delimited
//! [`ClientRequest`] per call and return the host's [`ClientResponse`].

use async_trait::async_trait;
use core::fmt::{self, Debug, Display};

use crate::requests::{ClientRequest, ClientResponse};

/// A failure in the layer carrying protocol messages. Propagated to the
/// caller as-is; the core never retries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportError(pub String);

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ClientRequest) -> Result<ClientResponse, TransportError>;
}
