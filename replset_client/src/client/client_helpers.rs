use std::time::Duration;

use crate::{
    ReadPreference, TlsOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_FREQUENCY,
    DEFAULT_LOCAL_THRESHOLD, DEFAULT_MEMBER_STALENESS,
};

pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a [`Client`](crate::Client) is configured with besides its seeds.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub replica_set_name: Option<String>,
    pub app_name: Option<String>,
    /// `None` means plain TCP.
    pub tls: Option<TlsOptions>,
    pub heartbeat_frequency: Duration,
    pub connect_timeout: Duration,
    pub local_threshold: Duration,
    /// How long a command waits for the first topology refresh.
    pub server_selection_timeout: Duration,
    pub member_staleness: Duration,
    /// Used when a command is run without its own read preference.
    pub read_preference: ReadPreference,
    pub default_database: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            replica_set_name: None,
            app_name: None,
            tls: None,
            heartbeat_frequency: DEFAULT_HEARTBEAT_FREQUENCY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            local_threshold: DEFAULT_LOCAL_THRESHOLD,
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
            member_staleness: DEFAULT_MEMBER_STALENESS,
            read_preference: ReadPreference::primary(),
            default_database: None,
        }
    }
}
