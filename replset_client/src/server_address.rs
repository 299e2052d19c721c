use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error_chain_fmt;

pub const DEFAULT_PORT: u16 = 27017;

/// Network identity of a replica-set member.
///
/// Hosts are stored lower-cased so that addresses reported by different members compare equal.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_lowercase(),
            port,
        }
    }

    /// Parses `host`, `host:port` or `[ipv6]:port`.
    pub fn parse(address: &str) -> Result<Self, ServerAddressError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ServerAddressError::Empty);
        }

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| ServerAddressError::InvalidHost(address.to_string()))?;
            let port = match rest {
                "" => None,
                _ => Some(
                    rest.strip_prefix(':')
                        .ok_or_else(|| ServerAddressError::InvalidHost(address.to_string()))?,
                ),
            };
            (host, port)
        } else {
            match address.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() || (host.contains(':') && !address.starts_with('[')) {
            return Err(ServerAddressError::InvalidHost(address.to_string()));
        }

        let port = match port {
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(ServerAddressError::InvalidPort(p.to_string())),
                Ok(p) => p,
            },
            None => DEFAULT_PORT,
        };

        Ok(Self::new(host, port))
    }
}

impl FromStr for ServerAddress {
    type Err = ServerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(thiserror::Error, Clone, PartialEq, Eq)]
pub enum ServerAddressError {
    #[error("Server address is empty")]
    Empty,
    #[error("Invalid host in server address `{0}`")]
    InvalidHost(String),
    #[error("Invalid port `{0}`")]
    InvalidPort(String),
}

impl fmt::Debug for ServerAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        error_chain_fmt(self, f)
    }
}
