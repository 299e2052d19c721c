use std::{fmt, sync::Arc, time::Duration};

use tracing::instrument;

use crate::{
    build_tls_config, Client, ClientError, ClientOptions, CommandEventHandler, CommandTransport,
    ConnectionString, MonitorConfig, ReadPreference, ServerAddress, TcpTransport, TlsOptions,
};

#[derive(Clone, Default)]
pub struct ClientBuilder {
    seeds: Vec<String>,
    options: ClientOptions,
    event_handler: Option<Arc<dyn CommandEventHandler>>,
    transport: Option<Arc<dyn CommandTransport>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a `mongodb://` connection string. Setters called afterwards override what the
    /// string configured.
    pub fn from_connection_string(uri: &str) -> Result<Self, ClientError> {
        let connection_string = ConnectionString::parse(uri)?;
        tracing::trace!("Parsed connection string: {:?}", &connection_string);
        Ok(Self::new().apply_connection_string(connection_string))
    }

    /// Replaces the seed list, including any hosts taken from a connection string.
    pub fn set_seeds<T>(mut self, seeds: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        self.seeds = seeds.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn set_replica_set_name(mut self, name: &str) -> Self {
        self.options.replica_set_name = Some(name.to_string());
        self
    }

    pub fn set_app_name(mut self, app_name: &str) -> Self {
        self.options.app_name = Some(app_name.to_string());
        self
    }

    pub fn set_tls_options(mut self, tls: TlsOptions) -> Self {
        tracing::trace!("Setting tls options: {:?}", &tls);
        self.options.tls = Some(tls);
        self
    }

    pub fn set_command_event_handler(mut self, handler: Arc<dyn CommandEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn set_heartbeat_frequency(mut self, frequency: Duration) -> Self {
        self.options.heartbeat_frequency = frequency;
        self
    }

    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn set_local_threshold(mut self, threshold: Duration) -> Self {
        self.options.local_threshold = threshold;
        self
    }

    pub fn set_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.options.server_selection_timeout = timeout;
        self
    }

    pub fn set_member_staleness(mut self, staleness: Duration) -> Self {
        self.options.member_staleness = staleness;
        self
    }

    pub fn set_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.options.read_preference = read_preference;
        self
    }

    pub fn set_default_database(mut self, database: &str) -> Self {
        self.options.default_database = Some(database.to_string());
        self
    }

    /// Replaces the TCP transport, mostly useful for tests. TLS options are ignored when a
    /// custom transport is set.
    pub fn set_transport(mut self, transport: Arc<dyn CommandTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn apply_connection_string(mut self, connection_string: ConnectionString) -> Self {
        self.seeds = connection_string
            .hosts
            .iter()
            .map(ServerAddress::to_string)
            .collect();

        let options = &mut self.options;
        options.default_database = connection_string.default_database;
        options.replica_set_name = connection_string.replica_set;
        options.app_name = connection_string.app_name;
        if connection_string.tls {
            options.tls = Some(connection_string.tls_options);
        }
        if let Some(timeout) = connection_string.server_selection_timeout {
            options.server_selection_timeout = timeout;
        }
        if let Some(timeout) = connection_string.connect_timeout {
            options.connect_timeout = timeout;
        }
        if let Some(frequency) = connection_string.heartbeat_frequency {
            options.heartbeat_frequency = frequency;
        }
        if let Some(threshold) = connection_string.local_threshold {
            options.local_threshold = threshold;
        }
        if let Some(read_preference) = connection_string.read_preference {
            options.read_preference = read_preference;
        }
        self
    }

    /// Starts a topology monitor and returns a [`Client`] using it.
    ///
    /// Every call starts a new monitor, so one builder can serve as a template for several
    /// clients. Must be called from within a tokio runtime.
    #[instrument(level = "debug", name = "Build Client", skip(self))]
    pub fn build(&self) -> Result<Client, ClientError> {
        if self.seeds.is_empty() {
            tracing::error!(
                "No seeds were supplied and a client can't exist without at least one"
            );
            return Err(ClientError::MissingSeedsError);
        }

        let seeds = validate_seeds(&self.seeds)?;

        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => {
                let tls_config = match &self.options.tls {
                    Some(tls) => Some(build_tls_config(tls).map_err(|e| {
                        tracing::error!("Unable to set up TLS. Caused by: {}", e);
                        e
                    })?),
                    None => None,
                };
                Arc::new(TcpTransport::new(self.options.connect_timeout, tls_config))
                    as Arc<dyn CommandTransport>
            }
        };

        let monitor_config = MonitorConfig {
            seeds,
            set_name: self.options.replica_set_name.clone(),
            app_name: self.options.app_name.clone(),
            heartbeat_frequency: self.options.heartbeat_frequency,
            connect_timeout: self.options.connect_timeout,
            member_staleness: self.options.member_staleness,
        };
        tracing::trace!("Monitor configuration: {:?}", &monitor_config);

        Ok(Client::new(
            self.options.clone(),
            monitor_config,
            transport,
            self.event_handler.clone(),
        ))
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("seeds", &self.seeds)
            .field("options", &self.options)
            .field("event_handler", &self.event_handler.is_some())
            .field("transport", &self.transport)
            .finish()
    }
}

/// Parses the seeds, dropping duplicates while keeping the first occurrence's position.
#[instrument(level = "debug", name = "Validate Seeds")]
fn validate_seeds<T>(seeds: &[T]) -> Result<Vec<ServerAddress>, ClientError>
where
    T: AsRef<str> + fmt::Debug,
{
    let mut addresses: Vec<ServerAddress> = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let address =
            ServerAddress::parse(seed.as_ref()).map_err(|source| ClientError::InvalidSeed {
                seed: seed.as_ref().to_string(),
                source,
            })?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}
