use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use futures::future::join_all;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    check_reply, hello_reply::HelloReply, Command, CommandTransport, Connection, HealthStatus,
    Member, MemberRole, MonitorConfig, MonitorError, MonitorMessage, ServerAddress,
    TopologySnapshot,
};

/// A refresh checks newly discovered members right away, up to this many rounds.
const MAX_DISCOVERY_ROUNDS: usize = 3;

pub(crate) struct MonitorActor {
    config: MonitorConfig,
    /// One dedicated monitoring connection per member.
    connections: HashMap<ServerAddress, Box<dyn Connection>>,
    members: HashMap<ServerAddress, Member>,
    publisher: watch::Sender<Arc<TopologySnapshot>>,
    receiver: mpsc::Receiver<MonitorMessage>,
    transport: Arc<dyn CommandTransport>,
    version: u64,
}

struct MemberCheck {
    connection: Box<dyn Connection>,
    reply: HelloReply,
    round_trip_time: Duration,
}

/// What one round of checks learned about the topology.
#[derive(Default)]
struct RoundOutcome {
    checked: usize,
    discovered: Vec<ServerAddress>,
    failures: Vec<(ServerAddress, String)>,
    /// Members listed by a healthy primary, including itself.
    primary_view: Option<HashSet<ServerAddress>>,
}

impl MonitorActor {
    pub(crate) fn new(
        config: MonitorConfig,
        transport: Arc<dyn CommandTransport>,
        receiver: mpsc::Receiver<MonitorMessage>,
        publisher: watch::Sender<Arc<TopologySnapshot>>,
    ) -> Self {
        let members = config
            .seeds
            .iter()
            .map(|address| (address.clone(), Member::new(address.clone())))
            .collect();

        Self {
            config,
            connections: HashMap::new(),
            members,
            publisher,
            receiver,
            transport,
            version: 0,
        }
    }

    #[instrument(
        level = "debug",
        name = "Topology Monitor - Handle Message",
        skip(self, msg),
        fields(correlation_id)
    )]
    async fn handle_message(&mut self, msg: MonitorMessage) {
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        match msg {
            MonitorMessage::RefreshNow { respond_to } => {
                let result = self.refresh().await;
                let _ = respond_to.send(result);
            }
            MonitorMessage::Shutdown => {}
        }
    }

    /// Checks every known member and publishes a new snapshot.
    ///
    /// The snapshot is published even when every check failed; the error only tells the caller
    /// that nothing could be reached.
    #[instrument(level = "debug", name = "Topology Monitor - Refresh", skip(self))]
    pub(crate) async fn refresh(&mut self) -> Result<Arc<TopologySnapshot>, MonitorError> {
        let mut pending = self.members.keys().cloned().collect::<Vec<_>>();
        let mut checked = 0;
        let mut failures = Vec::new();
        let mut primary_view = None;

        for _ in 0..MAX_DISCOVERY_ROUNDS {
            if pending.is_empty() {
                break;
            }
            let outcome = self.check_members(pending).await;
            checked += outcome.checked;
            failures.extend(outcome.failures);
            if outcome.primary_view.is_some() {
                primary_view = outcome.primary_view;
            }

            pending = Vec::new();
            for address in outcome.discovered {
                if !self.members.contains_key(&address) {
                    tracing::info!("Discovered member {}", address);
                    self.members
                        .insert(address.clone(), Member::new(address.clone()));
                    pending.push(address);
                }
            }
        }

        let now = Instant::now();
        if let Some(view) = primary_view {
            self.retain_members(|address, _| view.contains(address), "not listed by the primary");
        }
        let staleness = self.config.member_staleness;
        let seeds = self.config.seeds.iter().cloned().collect::<HashSet<_>>();
        self.retain_members(
            |address, member| match &member.health {
                HealthStatus::Unhealthy { since, .. } => {
                    seeds.contains(address) || now.duration_since(*since) <= staleness
                }
                _ => true,
            },
            "unhealthy for too long",
        );

        let snapshot = self.publish();

        if checked > 0 && failures.len() == checked {
            tracing::error!(
                "None of the {} checked member(s) could be reached",
                checked
            );
            return Err(MonitorError::TopologyUnavailable { failures });
        }
        Ok(snapshot)
    }

    /// Checks `addresses` concurrently and applies the results.
    async fn check_members(&mut self, addresses: Vec<ServerAddress>) -> RoundOutcome {
        let checks = addresses.into_iter().map(|address| {
            let connection = self.connections.remove(&address);
            let transport = self.transport.clone();
            let app_name = self.config.app_name.clone();
            let timeout = self.config.connect_timeout;
            async move {
                let result = check_member(transport, connection, &address, app_name, timeout).await;
                (address, result)
            }
        });
        let results = join_all(checks).await;

        let now = Instant::now();
        let mut outcome = RoundOutcome {
            checked: results.len(),
            ..Default::default()
        };

        for (address, result) in results {
            let member = self
                .members
                .entry(address.clone())
                .or_insert_with(|| Member::new(address.clone()));

            let check = match result {
                Ok(check) => check,
                Err(e) => {
                    let error = format!("{:#}", e);
                    tracing::warn!("Member {} is unreachable. Caused by: {}", address, error);
                    member.mark_unhealthy(error.clone(), now);
                    outcome.failures.push((address, error));
                    continue;
                }
            };
            self.connections.insert(address.clone(), check.connection);

            let reply = check.reply;
            if let Some(expected) = &self.config.set_name {
                if reply.set_name.as_ref() != Some(expected) {
                    let error = format!(
                        "Replica set name mismatch, expected `{}` but member reported {:?}",
                        expected, reply.set_name
                    );
                    tracing::warn!("Member {}: {}", address, error);
                    member.mark_unhealthy(error.clone(), now);
                    outcome.failures.push((address, error));
                    continue;
                }
            }

            member.role = reply.role();
            member.tags = reply.tags.clone();
            member.set_name = reply.set_name.clone();
            member.health = HealthStatus::Healthy;
            member.last_update = Some(now);
            member.record_round_trip(check.round_trip_time);
            tracing::debug!(
                "Member {} is {} with tags {:?}, rtt {:?}",
                address,
                member.role,
                member.tags,
                member.round_trip_time
            );

            let advertised = reply.advertised_members();
            if member.role == MemberRole::Primary {
                let mut view = advertised.iter().cloned().collect::<HashSet<_>>();
                view.insert(address.clone());
                outcome.primary_view = Some(view);
            }
            outcome.discovered.extend(advertised);
        }

        outcome
    }

    fn retain_members<F>(&mut self, mut keep: F, reason: &str)
    where
        F: FnMut(&ServerAddress, &Member) -> bool,
    {
        let removed = self
            .members
            .iter()
            .filter(|(address, member)| !keep(address, member))
            .map(|(address, _)| address.clone())
            .collect::<Vec<_>>();

        for address in removed {
            tracing::info!("Removing member {}: {}", address, reason);
            self.members.remove(&address);
            self.connections.remove(&address);
        }
    }

    fn publish(&mut self) -> Arc<TopologySnapshot> {
        self.version += 1;
        let set_name = self.config.set_name.clone().or_else(|| {
            self.members
                .values()
                .find(|m| m.role == MemberRole::Primary && m.is_healthy())
                .and_then(|m| m.set_name.clone())
        });
        let snapshot = Arc::new(TopologySnapshot::new(
            self.version,
            set_name,
            self.members.values().cloned().collect(),
        ));
        self.publisher.send_replace(snapshot.clone());
        tracing::debug!(
            "Published topology version {} with {} member(s)",
            snapshot.version,
            snapshot.members.len()
        );
        snapshot
    }
}

/// Sends `hello` to one member, reusing its monitoring connection when there is one.
///
/// Client metadata goes only into the first `hello` on a connection.
async fn check_member(
    transport: Arc<dyn CommandTransport>,
    connection: Option<Box<dyn Connection>>,
    address: &ServerAddress,
    app_name: Option<String>,
    timeout: Duration,
) -> anyhow::Result<MemberCheck> {
    let check = async move {
        let mut connection = match connection {
            Some(connection) => connection,
            None => transport.checkout(address).await?,
        };
        let command = if connection.metadata_sent() {
            Command::hello(None)
        } else {
            Command::hello(app_name.as_deref())
        };
        let started = Instant::now();
        let reply = connection.send_command(&command).await?;
        let round_trip_time = started.elapsed();

        let reply = check_reply(reply)?;
        if command.body.contains_key("client") {
            connection.mark_metadata_sent();
        }
        let reply = HelloReply::from_document(reply).context("Invalid hello reply")?;
        Ok::<_, anyhow::Error>(MemberCheck {
            connection,
            reply,
            round_trip_time,
        })
    };

    tokio::time::timeout(timeout, check)
        .await
        .map_err(|_| anyhow::anyhow!("Check timed out after {:?}", timeout))?
}

#[instrument(level = "debug", name = "Running Topology Monitor", skip(actor))]
pub(crate) async fn run_monitor_actor(mut actor: MonitorActor) {
    let period = actor
        .config
        .heartbeat_frequency
        .max(crate::MIN_HEARTBEAT_FREQUENCY);
    let mut heartbeat = tokio::time::interval(period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                tracing::debug!("Refreshing topology via heartbeat.");
                if let Err(e) = actor.refresh().await {
                    tracing::error!("Topology refresh failed. Caused by: {}", e);
                }
            },
            opt_msg = actor.receiver.recv() => {
                let msg = match opt_msg {
                    Some(MonitorMessage::Shutdown) | None => break,
                    Some(msg) => msg,
                };
                actor.handle_message(msg).await;
                heartbeat.reset();
            },
        }
    }

    tracing::debug!("Topology monitor stopped.");
}
