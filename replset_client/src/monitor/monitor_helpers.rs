use std::{sync::Arc, time::Duration};

use tokio::sync::oneshot;

use crate::{MonitorError, ServerAddress, TopologySnapshot};

pub const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);
pub const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MEMBER_STALENESS: Duration = Duration::from_secs(60);

/// Settings for a [`TopologyMonitor`](crate::TopologyMonitor).
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub seeds: Vec<ServerAddress>,
    /// Expected replica-set name. Members reporting another name are treated as unhealthy.
    pub set_name: Option<String>,
    /// Sent with every `hello` so the server can log who is connecting.
    pub app_name: Option<String>,
    pub heartbeat_frequency: Duration,
    /// Upper bound for connecting to and checking one member.
    pub connect_timeout: Duration,
    /// How long a non-seed member may stay unhealthy before it is forgotten.
    pub member_staleness: Duration,
}

impl MonitorConfig {
    pub fn new(seeds: Vec<ServerAddress>) -> Self {
        Self {
            seeds,
            set_name: None,
            app_name: None,
            heartbeat_frequency: DEFAULT_HEARTBEAT_FREQUENCY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            member_staleness: DEFAULT_MEMBER_STALENESS,
        }
    }
}

pub(crate) enum MonitorMessage {
    /// Runs a refresh right away instead of waiting for the next heartbeat.
    RefreshNow {
        respond_to: oneshot::Sender<Result<Arc<TopologySnapshot>, MonitorError>>,
    },
    Shutdown,
}
