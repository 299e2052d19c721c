//! Parsing of `mongodb://` connection strings.
//!
//! Only the options that matter to a replica-set client are understood. Unknown options are
//! logged and skipped so that strings written for full drivers still work.
use std::{path::PathBuf, str::FromStr, time::Duration};

use percent_encoding::percent_decode_str;
use tracing::instrument;

use crate::{
    error_chain_fmt, ReadPreference, ReadPreferenceError, ReadPreferenceMode, ServerAddress,
    ServerAddressError, TagSet, TlsOptions, MIN_HEARTBEAT_FREQUENCY,
};

const SCHEME: &str = "mongodb://";

/// The settings found in a connection string. Anything not mentioned stays `None`, so the
/// caller's defaults apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionString {
    pub hosts: Vec<ServerAddress>,
    pub default_database: Option<String>,
    pub replica_set: Option<String>,
    pub app_name: Option<String>,
    /// Set by `tls=true`, `ssl=true`, or any TLS file option.
    pub tls: bool,
    pub tls_options: TlsOptions,
    pub server_selection_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub heartbeat_frequency: Option<Duration>,
    pub local_threshold: Option<Duration>,
    pub read_preference: Option<ReadPreference>,
}

impl ConnectionString {
    #[instrument(level = "debug", name = "Parse Connection String", skip(uri))]
    pub fn parse(uri: &str) -> Result<Self, ConnectionStringError> {
        let rest = match uri.get(..SCHEME.len()) {
            Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) => &uri[SCHEME.len()..],
            _ => return Err(ConnectionStringError::InvalidScheme(scheme_of(uri))),
        };

        let (authority, path_and_query) = match rest.find(['/', '?']) {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        if authority.contains('@') {
            return Err(ConnectionStringError::CredentialsNotSupported);
        }

        let hosts = authority
            .split(',')
            .filter(|h| !h.is_empty())
            .map(|host| {
                ServerAddress::parse(host).map_err(|source| ConnectionStringError::InvalidHost {
                    host: host.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if hosts.is_empty() {
            return Err(ConnectionStringError::MissingHosts);
        }

        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, query),
            None => (path_and_query, ""),
        };
        let database = path.trim_start_matches('/');

        let mut connection_string = ConnectionString {
            hosts,
            default_database: (!database.is_empty()).then(|| database.to_string()),
            ..Default::default()
        };
        connection_string.apply_options(query)?;
        Ok(connection_string)
    }

    fn apply_options(&mut self, query: &str) -> Result<(), ConnectionStringError> {
        let mut explicit_tls = None;
        let mut mode = None;
        let mut tag_sets = Vec::new();

        for (name, value) in query_pairs(query)? {
            let name = name.as_str();
            match name.to_lowercase().as_str() {
                "replicaset" => self.replica_set = Some(value),
                "appname" => self.app_name = Some(value),
                "tls" | "ssl" => {
                    let enabled = parse_bool(name, &value)?;
                    if explicit_tls.is_some_and(|previous| previous != enabled) {
                        return Err(invalid(name, &value, "conflicts with an earlier tls/ssl"));
                    }
                    explicit_tls = Some(enabled);
                }
                "tlscafile" => self.tls_options.ca_file = Some(PathBuf::from(value)),
                "tlscertificatekeyfile" => {
                    self.tls_options.cert_key_file = Some(PathBuf::from(value))
                }
                "tlscertificatekeyfilepassword" => {
                    self.tls_options.cert_key_file_password = Some(value)
                }
                "serverselectiontimeoutms" => {
                    self.server_selection_timeout = Some(parse_millis(name, &value)?)
                }
                "connecttimeoutms" => self.connect_timeout = Some(parse_millis(name, &value)?),
                "heartbeatfrequencyms" => {
                    let frequency = parse_millis(name, &value)?;
                    if frequency < MIN_HEARTBEAT_FREQUENCY {
                        return Err(invalid(name, &value, "must be at least 500"));
                    }
                    self.heartbeat_frequency = Some(frequency);
                }
                "localthresholdms" => self.local_threshold = Some(parse_millis(name, &value)?),
                "readpreference" => mode = Some(ReadPreferenceMode::from_str(&value)?),
                "readpreferencetags" => tag_sets.push(parse_tag_set(name, &value)?),
                _ => tracing::warn!("Ignoring unsupported connection string option `{}`", name),
            }
        }

        let has_tls_files =
            self.tls_options.ca_file.is_some() || self.tls_options.cert_key_file.is_some();
        self.tls = match explicit_tls {
            Some(false) if has_tls_files => {
                return Err(invalid(
                    "tls",
                    "false",
                    "TLS file options were given with TLS disabled",
                ))
            }
            Some(enabled) => enabled,
            None => has_tls_files,
        };

        if mode.is_some() || !tag_sets.is_empty() {
            self.read_preference = Some(ReadPreference::new(mode.unwrap_or_default(), tag_sets)?);
        }
        Ok(())
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn scheme_of(uri: &str) -> String {
    uri.split_once("://")
        .map(|(scheme, _)| scheme.to_string())
        .unwrap_or_default()
}

/// Splits the query into percent-decoded pairs. Unlike form encoding, `+` stays a literal plus.
fn query_pairs(query: &str) -> Result<Vec<(String, String)>, ConnectionStringError> {
    let decode = |raw: &str| {
        percent_decode_str(raw)
            .decode_utf8()
            .map(|decoded| decoded.into_owned())
            .map_err(|e| invalid(raw, raw, &format!("is not valid UTF-8 once decoded. {}", e)))
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode(name)?, decode(value)?))
        })
        .collect()
}

fn invalid(name: &str, value: &str, reason: &str) -> ConnectionStringError {
    ConnectionStringError::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConnectionStringError> {
    match value.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(name, value, "expected true or false")),
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration, ConnectionStringError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(name, value, "expected a number of milliseconds"))
}

/// `dc:east,rack:1` becomes one tag set. An empty value is the empty tag set.
fn parse_tag_set(name: &str, value: &str) -> Result<TagSet, ConnectionStringError> {
    value
        .split(',')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once(':') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(invalid(name, value, "expected key:value pairs")),
        })
        .collect()
}

#[derive(thiserror::Error)]
pub enum ConnectionStringError {
    #[error("Unsupported scheme `{0}`, expected `mongodb`")]
    InvalidScheme(String),
    #[error("Credentials are not supported in the connection string")]
    CredentialsNotSupported,
    #[error("The connection string names no hosts")]
    MissingHosts,
    #[error("Invalid host `{host}`")]
    InvalidHost {
        host: String,
        #[source]
        source: ServerAddressError,
    },
    #[error("Invalid value `{value}` for option `{name}`: {reason}")]
    InvalidOption {
        name: String,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    ReadPreference(#[from] ReadPreferenceError),
}
impl std::fmt::Debug for ConnectionStringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
