use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use bson::Document;
use parking_lot::Mutex;
use rustls::{pki_types::ServerName, ClientConfig};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;
use tracing::instrument;

use crate::{
    wire, Command, CommandTransport, Connection, ConnectionId, ServerAddress, TransportError,
};

/// Idle connections kept per member.
const MAX_IDLE_PER_ADDRESS: usize = 8;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type IdlePool = HashMap<ServerAddress, Vec<IdleConnection>>;

/// A pooled stream. The metadata flag travels with the stream since the server remembers it per
/// connection.
struct IdleConnection {
    id: u32,
    metadata_sent: bool,
    stream: Box<dyn AsyncStream>,
}

/// TCP transport speaking OP_MSG, optionally over TLS.
///
/// Connections are pooled per member. A connection goes back to the pool when it is dropped,
/// unless a command on it failed or was abandoned halfway.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    connect_timeout: Duration,
    idle: Mutex<IdlePool>,
    next_id: AtomicU32,
    tls: Option<TlsConnector>,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, tls_config: Option<Arc<ClientConfig>>) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                connect_timeout,
                idle: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(1),
                tls: tls_config.map(TlsConnector::from),
            }),
        }
    }

    #[instrument(level = "debug", name = "TcpTransport - Connect", skip(self))]
    async fn connect(&self, address: &ServerAddress) -> Result<Box<dyn AsyncStream>, TransportError> {
        let timeout = self.inner.connect_timeout;
        let tcp = tokio::time::timeout(
            timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout(address.to_string()))??;
        tcp.set_nodelay(true)?;

        let connector = match &self.inner.tls {
            Some(connector) => connector,
            None => return Ok(Box::new(tcp)),
        };

        let server_name = ServerName::try_from(address.host.as_str())
            .map_err(|e| TransportError::Tls(format!("Invalid server name `{}`. {}", address.host, e)))?
            .to_owned();
        tracing::trace!("Starting TLS handshake with {}", address);
        let stream = tokio::time::timeout(timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| TransportError::ConnectTimeout(address.to_string()))??;
        Ok(Box::new(stream))
    }

    /// Number of idle pooled connections to `address`.
    pub fn idle_connections(&self, address: &ServerAddress) -> usize {
        self.inner.idle.lock().get(address).map(Vec::len).unwrap_or(0)
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connect_timeout", &self.inner.connect_timeout)
            .field("tls", &self.inner.tls.is_some())
            .finish()
    }
}

#[async_trait]
impl CommandTransport for TcpTransport {
    async fn checkout(
        &self,
        address: &ServerAddress,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let pooled = self
            .inner
            .idle
            .lock()
            .get_mut(address)
            .and_then(|idle| idle.pop());

        let IdleConnection {
            id,
            metadata_sent,
            stream,
        } = match pooled {
            Some(pooled) => pooled,
            None => {
                let stream = self.connect(address).await?;
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Opened connection {} to {}", id, address);
                IdleConnection {
                    id,
                    metadata_sent: false,
                    stream,
                }
            }
        };

        Ok(Box::new(TcpConnection {
            id: ConnectionId {
                address: address.clone(),
                id,
            },
            in_flight: false,
            metadata_sent,
            pool: Arc::downgrade(&self.inner),
            stream: Some(stream),
        }))
    }
}

struct TcpConnection {
    id: ConnectionId,
    /// Set while a command is between write and read.
    in_flight: bool,
    metadata_sent: bool,
    pool: Weak<TransportInner>,
    stream: Option<Box<dyn AsyncStream>>,
}

#[async_trait]
impl Connection for TcpConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn metadata_sent(&self) -> bool {
        self.metadata_sent
    }

    fn mark_metadata_sent(&mut self) {
        self.metadata_sent = true;
    }

    async fn send_command(&mut self, command: &Command) -> Result<Document, TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::Protocol("Connection is closed".into()))?;

        self.in_flight = true;
        let result = match wire::write_command(stream.as_mut(), command).await {
            Ok(()) => wire::read_reply(stream.as_mut(), command.request_id()).await,
            Err(e) => Err(e),
        };
        self.in_flight = false;

        if let Err(e) = &result {
            tracing::debug!("Closing connection {} after error: {}", self.id, e);
            self.stream = None;
        }
        result
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if self.in_flight {
            return;
        }
        if let (Some(stream), Some(inner)) = (self.stream.take(), self.pool.upgrade()) {
            let mut idle = inner.idle.lock();
            let connections = idle.entry(self.id.address.clone()).or_default();
            if connections.len() < MAX_IDLE_PER_ADDRESS {
                connections.push(IdleConnection {
                    id: self.id.id,
                    metadata_sent: self.metadata_sent,
                    stream,
                });
            }
        }
    }
}
