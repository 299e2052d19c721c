use std::time::Duration;

use crate::{error_chain_fmt, ServerAddress};

#[derive(thiserror::Error)]
pub enum MonitorError {
    #[error("No replica-set member could be reached ({} member check(s) failed)", .failures.len())]
    TopologyUnavailable {
        failures: Vec<(ServerAddress, String)>,
    },
    #[error("Timed out after {0:?} waiting for the first topology refresh")]
    Timeout(Duration),
    #[error("The topology monitor has stopped")]
    ActorStopped,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
