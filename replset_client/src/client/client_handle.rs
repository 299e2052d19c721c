use std::{fmt, sync::Arc, time::Instant};

use bson::Document;
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    check_reply, ClientBuilder, ClientError, ClientOptions, Command, CommandEventHandler,
    CommandFailedEvent, CommandStartedEvent, CommandSucceededEvent, CommandTransport,
    MonitorConfig, MonitorError, ReadPreference, ReadPreferenceMode, ServerSelector,
    TopologyMonitor, TopologySnapshot,
};

/**
Handle to a replica set.

Cloning is cheap and shares the background [`TopologyMonitor`], so clone the client into every
task that needs it instead of building a new one. The monitor stops when [`Client::shutdown`]
is called or the last clone is dropped.
*/
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    event_handler: Option<Arc<dyn CommandEventHandler>>,
    monitor: TopologyMonitor,
    options: ClientOptions,
    selector: ServerSelector,
    transport: Arc<dyn CommandTransport>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    // Only the builder creates clients.
    pub(crate) fn new(
        options: ClientOptions,
        monitor_config: MonitorConfig,
        transport: Arc<dyn CommandTransport>,
        event_handler: Option<Arc<dyn CommandEventHandler>>,
    ) -> Self {
        let monitor = TopologyMonitor::start(monitor_config, transport.clone());
        let selector = ServerSelector::new(options.local_threshold);

        Self {
            inner: Arc::new(ClientInner {
                event_handler,
                monitor,
                options,
                selector,
                transport,
            }),
        }
    }

    /// Runs `body` against `database` on a member chosen by `read_preference`, or by the
    /// client's default read preference when `None`.
    ///
    /// The member is selected once. A failure is returned as is and the command is not retried
    /// on another member.
    #[instrument(
        level = "debug",
        name = "Client - Run Command",
        skip(self, body, read_preference),
        fields(correlation_id)
    )]
    pub async fn run_command(
        &self,
        database: &str,
        body: Document,
        read_preference: Option<ReadPreference>,
    ) -> Result<Document, ClientError> {
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        let read_preference =
            read_preference.unwrap_or_else(|| self.inner.options.read_preference.clone());

        let timeout = self.inner.options.server_selection_timeout;
        let snapshot = self
            .inner
            .monitor
            .wait_for_ready(timeout)
            .await
            .map_err(|e| match e {
                MonitorError::Timeout(waited) => ClientError::ServerSelectionTimeout(waited),
                e => ClientError::Monitor(e),
            })?;

        let member = self
            .inner
            .selector
            .select(&read_preference, &snapshot)
            .map_err(|e| {
                tracing::warn!("Server selection failed. Caused by: {}", e);
                e
            })?;
        tracing::debug!(
            "Running command on {} ({}) with topology version {}",
            member.address,
            member.role,
            snapshot.version
        );

        let mut command = Command::new(database, body);
        if read_preference.mode() != ReadPreferenceMode::Primary {
            command
                .body
                .insert("$readPreference", read_preference.to_document());
        }

        let mut connection = self.inner.transport.checkout(&member.address).await?;
        let connection_id = connection.id().clone();
        let command_name = command.name().to_string();

        if let Some(handler) = &self.inner.event_handler {
            handler.handle_command_started_event(CommandStartedEvent {
                command: command.to_wire_document(),
                database_name: command.database.clone(),
                command_name: command_name.clone(),
                request_id: command.request_id(),
                connection: connection_id.clone(),
            });
        }

        let started = Instant::now();
        let result = connection.send_command(&command).await;
        let duration = started.elapsed();

        let failed = |failure: String| {
            if let Some(handler) = &self.inner.event_handler {
                handler.handle_command_failed_event(CommandFailedEvent {
                    duration,
                    command_name: command_name.clone(),
                    failure,
                    request_id: command.request_id(),
                    connection: connection_id.clone(),
                });
            }
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    "Command `{}` failed on {}. Caused by: {}",
                    command_name,
                    member.address,
                    e
                );
                failed(e.to_string());
                return Err(ClientError::CommandFailed {
                    address: member.address,
                    source: e.into(),
                });
            }
        };

        match check_reply(reply) {
            Ok(reply) => {
                if let Some(handler) = &self.inner.event_handler {
                    handler.handle_command_succeeded_event(CommandSucceededEvent {
                        duration,
                        reply: reply.clone(),
                        command_name: command_name.clone(),
                        request_id: command.request_id(),
                        connection: connection_id.clone(),
                    });
                }
                Ok(reply)
            }
            Err(source) => {
                tracing::warn!("Command `{}` returned an error: {}", command_name, source);
                failed(source.to_string());
                Err(ClientError::CommandFailed {
                    address: member.address,
                    source: source.into(),
                })
            }
        }
    }

    /// The most recent topology snapshot, without waiting for a refresh.
    pub fn topology(&self) -> Arc<TopologySnapshot> {
        self.inner.monitor.current_snapshot()
    }

    pub fn monitor(&self) -> &TopologyMonitor {
        &self.inner.monitor
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// The database named in the connection string, if any.
    pub fn default_database(&self) -> Option<&str> {
        self.inner.options.default_database.as_deref()
    }

    #[instrument(level = "debug", name = "Client - Shutdown", skip(self))]
    pub async fn shutdown(&self) {
        self.inner.monitor.shutdown().await;
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .field("monitor", &self.inner.monitor)
            .field("transport", &self.inner.transport)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use std::time::Duration;

    use bson::doc;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        transport::mock_transport::{hello, MockTransport},
        CommandFailure, SelectionError, TagSet, TracingCommandEventHandler,
    };

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<String>>,
    }

    impl CommandEventHandler for RecordingHandler {
        fn handle_command_started_event(&self, event: CommandStartedEvent) {
            self.events.lock().push(format!(
                "started {} {} on {}",
                event.command_name, event.database_name, event.connection.address
            ));
        }

        fn handle_command_succeeded_event(&self, event: CommandSucceededEvent) {
            self.events
                .lock()
                .push(format!("succeeded {}", event.command_name));
        }

        fn handle_command_failed_event(&self, event: CommandFailedEvent) {
            self.events
                .lock()
                .push(format!("failed {}: {}", event.command_name, event.failure));
        }
    }

    fn replica_set() -> MockTransport {
        let hosts = ["a:27017", "b:27017", "c:27017"];
        let transport = MockTransport::new();
        transport.set_server("a:27017", hello("primary", "repl0", "a:27017", &hosts, &[]));
        transport.set_server(
            "b:27017",
            hello("secondary", "repl0", "b:27017", &hosts, &[("nodeType", "analytics")]),
        );
        transport.set_server(
            "c:27017",
            hello("secondary", "repl0", "c:27017", &hosts, &[("nodeType", "oltp")]),
        );
        transport
    }

    fn client(transport: &MockTransport) -> Client {
        Client::builder()
            .set_seeds(&["a:27017"])
            .set_replica_set_name("repl0")
            .set_heartbeat_frequency(Duration::from_secs(3600))
            .set_server_selection_timeout(Duration::from_secs(5))
            .set_transport(Arc::new(transport.clone()))
            .build()
            .unwrap()
    }

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn run_command__uses_primary_by_default() {
        // Arrange
        let transport = replica_set();
        let client = client(&transport);

        // Act
        let reply = client
            .run_command("admin", doc! { "ping": 1 }, None)
            .await
            .unwrap();

        // Assert
        assert_eq!(reply, doc! { "ok": 1.0 });
        assert_eq!(transport.received("a:27017"), vec!["ping"]);
        assert!(transport.received("b:27017").is_empty());
    }

    #[tokio::test]
    async fn run_command__routes_to_member_matching_tag_set() {
        // Arrange
        let transport = replica_set();
        let client = client(&transport);
        let read_preference = ReadPreference::new(
            ReadPreferenceMode::SecondaryPreferred,
            vec![tags(&[("nodeType", "analytics")]), TagSet::new()],
        )
        .unwrap();

        // Act
        for _ in 0..5 {
            client
                .run_command(
                    "admin",
                    doc! { "replSetGetStatus": 1 },
                    Some(read_preference.clone()),
                )
                .await
                .unwrap();
        }

        // Assert
        assert_eq!(transport.received("b:27017").len(), 5);
        assert!(transport.received("a:27017").is_empty());
        assert!(transport.received("c:27017").is_empty());
    }

    #[tokio::test]
    async fn run_command__reports_no_matching_server_for_unknown_tags() {
        // Arrange
        let transport = replica_set();
        let client = client(&transport);
        let read_preference = ReadPreference::new(
            ReadPreferenceMode::Secondary,
            vec![tags(&[("nodeType", "reporting")])],
        )
        .unwrap();

        // Act
        let result = client
            .run_command("admin", doc! { "ping": 1 }, Some(read_preference))
            .await;

        // Assert
        assert!(matches!(
            result,
            Err(ClientError::Selection(SelectionError::NoMatchingServer { .. }))
        ));
    }

    #[tokio::test]
    async fn run_command__fails_with_topology_unavailable_when_nothing_answers() {
        // Arrange
        let transport = MockTransport::new();
        let client = client(&transport);

        // Act
        let result = client
            .run_command("admin", doc! { "ping": 1 }, None)
            .await;

        // Assert
        assert!(matches!(
            result,
            Err(ClientError::Selection(SelectionError::TopologyUnavailable))
        ));
    }

    #[tokio::test]
    async fn run_command__times_out_waiting_for_first_refresh() {
        // Arrange
        let transport = replica_set();
        transport.set_delay("a:27017", Duration::from_millis(500));
        let client = Client::builder()
            .set_seeds(&["a:27017"])
            .set_server_selection_timeout(Duration::from_millis(50))
            .set_transport(Arc::new(transport))
            .build()
            .unwrap();

        // Act
        let result = client.run_command("admin", doc! { "ping": 1 }, None).await;

        // Assert
        assert!(matches!(result, Err(ClientError::ServerSelectionTimeout(_))));
    }

    #[tokio::test]
    async fn run_command__surfaces_server_errors_and_emits_events() {
        // Arrange
        let transport = replica_set();
        transport.set_reply(
            "a:27017",
            "replSetGetStatus",
            doc! { "ok": 0.0, "code": 13, "codeName": "Unauthorized", "errmsg": "not allowed" },
        );
        let handler = Arc::new(RecordingHandler::default());
        let client = Client::builder()
            .set_seeds(&["a:27017"])
            .set_heartbeat_frequency(Duration::from_secs(3600))
            .set_command_event_handler(handler.clone())
            .set_transport(Arc::new(transport.clone()))
            .build()
            .unwrap();

        // Act
        let ok = client.run_command("admin", doc! { "ping": 1 }, None).await;
        let failed = client
            .run_command("admin", doc! { "replSetGetStatus": 1 }, None)
            .await;

        // Assert
        assert!(ok.is_ok());
        match failed {
            Err(ClientError::CommandFailed {
                address,
                source: CommandFailure::Reply(error),
            }) => {
                assert_eq!(address.to_string(), "a:27017");
                assert_eq!(error.code, 13);
                assert_eq!(error.code_name, "Unauthorized");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
        let events = handler.events.lock().clone();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], "started ping admin on a:27017");
        assert_eq!(events[1], "succeeded ping");
        assert_eq!(events[2], "started replSetGetStatus admin on a:27017");
        assert!(events[3].starts_with("failed replSetGetStatus"));
    }

    #[tokio::test]
    async fn run_command__does_not_retry_when_member_drops_the_connection() {
        // Arrange
        let transport = replica_set();
        let client = client(&transport);
        client.monitor().wait_for_ready(Duration::from_secs(5)).await.unwrap();
        transport.set_reachable("a:27017", false);

        // Act
        let result = client.run_command("admin", doc! { "ping": 1 }, None).await;

        // Assert
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert!(transport.received("b:27017").is_empty());
    }

    #[tokio::test]
    async fn run_command__reports_connection_dropped_mid_command_as_command_failed() {
        // Arrange
        let transport = replica_set();
        let handler = Arc::new(RecordingHandler::default());
        let client = Client::builder()
            .set_seeds(&["a:27017"])
            .set_heartbeat_frequency(Duration::from_secs(3600))
            .set_command_event_handler(handler.clone())
            .set_transport(Arc::new(transport.clone()))
            .build()
            .unwrap();
        transport.set_drop_commands("a:27017", true);

        // Act
        let result = client.run_command("admin", doc! { "ping": 1 }, None).await;

        // Assert
        assert!(matches!(
            result,
            Err(ClientError::CommandFailed {
                source: CommandFailure::Connection(_),
                ..
            })
        ));
        let events = handler.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert!(events[1].starts_with("failed ping"));
    }

    #[tokio::test]
    async fn tracing_command_event_handler_can_be_installed() {
        // Arrange
        let transport = replica_set();
        let client = Client::builder()
            .set_seeds(&["a:27017"])
            .set_command_event_handler(Arc::new(TracingCommandEventHandler::new()))
            .set_transport(Arc::new(transport))
            .build()
            .unwrap();

        // Act
        let reply = client
            .run_command(
                "admin",
                doc! { "ping": 1 },
                Some(ReadPreference::nearest()),
            )
            .await;

        // Assert
        assert!(reply.is_ok());
    }

    #[tokio::test]
    async fn topology__reflects_discovered_members_and_shutdown_stops_monitor() {
        // Arrange
        let transport = replica_set();
        let client = client(&transport);
        client.monitor().wait_for_ready(Duration::from_secs(5)).await.unwrap();

        // Act
        let topology = client.topology();
        client.shutdown().await;
        let refresh = client.monitor().refresh().await;

        // Assert
        assert_eq!(topology.members.len(), 3);
        assert_eq!(topology.set_name.as_deref(), Some("repl0"));
        assert!(matches!(refresh, Err(MonitorError::ActorStopped)));
    }
}
