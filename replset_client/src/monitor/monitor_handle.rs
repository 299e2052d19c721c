use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::instrument;

use crate::{
    run_monitor_actor, CommandTransport, Member, MonitorActor, MonitorConfig, MonitorError,
    MonitorMessage, TopologySnapshot,
};

/**
Handle to the background topology monitor.

Cloning the handle is cheap and does not start another monitor. Snapshots are read straight
from a watch channel, so [`current_snapshot`](Self::current_snapshot) never waits on a refresh
in progress. The monitor stops on [`shutdown`](Self::shutdown) or when the last handle is
dropped.
*/
#[derive(Clone, Debug)]
pub struct TopologyMonitor {
    sender: mpsc::Sender<MonitorMessage>,
    snapshots: watch::Receiver<Arc<TopologySnapshot>>,
}

impl TopologyMonitor {
    /// Spawns the monitor task. Must be called from within a tokio runtime.
    ///
    /// The first refresh starts immediately; until it completes the snapshot has version 0 and
    /// lists the seeds as unknown members.
    pub fn start(config: MonitorConfig, transport: Arc<dyn CommandTransport>) -> Self {
        let initial = TopologySnapshot::unrefreshed(
            config.set_name.clone(),
            config.seeds.iter().cloned().map(Member::new).collect(),
        );
        let (publisher, snapshots) = watch::channel(Arc::new(initial));
        let (sender, receiver) = mpsc::channel(8);

        let actor = MonitorActor::new(config, transport, receiver, publisher);
        tokio::spawn(run_monitor_actor(actor));

        Self { sender, snapshots }
    }

    /// The most recently published snapshot.
    pub fn current_snapshot(&self) -> Arc<TopologySnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Runs a refresh now and returns its outcome.
    #[instrument(level = "debug", name = "Monitor Handle - Refresh", skip(self))]
    pub async fn refresh(&self) -> Result<Arc<TopologySnapshot>, MonitorError> {
        let (tx, rx) = oneshot::channel();

        tracing::trace!("Sending refresh request to monitor");
        self.sender
            .send(MonitorMessage::RefreshNow { respond_to: tx })
            .await
            .map_err(|_| MonitorError::ActorStopped)?;

        rx.await.map_err(|_| MonitorError::ActorStopped)?
    }

    /// Waits until the first refresh has been published.
    #[instrument(level = "debug", name = "Monitor Handle - Wait For Ready", skip(self))]
    pub async fn wait_for_ready(
        &self,
        timeout: Duration,
    ) -> Result<Arc<TopologySnapshot>, MonitorError> {
        let mut snapshots = self.snapshots.clone();
        let ready = tokio::time::timeout(timeout, snapshots.wait_for(|s| s.version > 0)).await;
        match ready {
            Ok(Ok(snapshot)) => Ok(Arc::clone(&snapshot)),
            Ok(Err(_)) => Err(MonitorError::ActorStopped),
            Err(_) => Err(MonitorError::Timeout(timeout)),
        }
    }

    /// A receiver that is notified every time a new snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<TopologySnapshot>> {
        self.snapshots.clone()
    }

    #[instrument(level = "debug", name = "Monitor Handle - Shutdown", skip(self))]
    pub async fn shutdown(&self) {
        if self.sender.send(MonitorMessage::Shutdown).await.is_err() {
            tracing::debug!("Topology monitor was already stopped");
        }
    }
}
