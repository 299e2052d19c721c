mod tcp_transport;
mod tls;
mod transport_error;

#[cfg(test)]
pub(crate) mod mock_transport;

use std::fmt;

use async_trait::async_trait;
use bson::Document;

use crate::{Command, ServerAddress};

pub use tcp_transport::TcpTransport;
pub use tls::TlsOptions;
pub(crate) use tls::build_tls_config;
pub use transport_error::TransportError;

/// Identifies one connection to one member.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ConnectionId {
    pub address: ServerAddress,
    /// Unique per transport.
    pub id: u32,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.id)
    }
}

/// Source of connections to replica-set members.
///
/// Implementations own connection establishment, including any TLS upgrade, which must complete
/// before the connection is handed out.
#[async_trait]
pub trait CommandTransport: Send + Sync + fmt::Debug {
    async fn checkout(&self, address: &ServerAddress)
        -> Result<Box<dyn Connection>, TransportError>;
}

/// An established connection able to run commands.
#[async_trait]
pub trait Connection: Send {
    fn id(&self) -> &ConnectionId;

    /// Whether a handshake carrying client metadata already ran on this connection. Servers
    /// reject a second `hello` with a `client` field on the same connection.
    fn metadata_sent(&self) -> bool;

    fn mark_metadata_sent(&mut self);

    /// Sends `command` and returns the raw reply. Replies with `ok: 0` are not errors at this
    /// level; see [`check_reply`](crate::check_reply).
    async fn send_command(&mut self, command: &Command) -> Result<Document, TransportError>;
}
