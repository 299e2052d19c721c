use crate::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("Wire protocol error: {0}")]
    Protocol(String),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
