//! Command monitoring.
//!
//! A [`CommandEventHandler`] is handed to the [`ClientBuilder`](crate::ClientBuilder) and is
//! called around every command the client sends on behalf of a caller. Monitoring heartbeats
//! are not reported.
use std::time::Duration;

use bson::{Bson, Document};

use crate::ConnectionId;

#[derive(Debug, Clone)]
pub struct CommandStartedEvent {
    pub command: Document,
    pub database_name: String,
    pub command_name: String,
    pub request_id: i32,
    pub connection: ConnectionId,
}

#[derive(Debug, Clone)]
pub struct CommandSucceededEvent {
    pub duration: Duration,
    pub reply: Document,
    pub command_name: String,
    pub request_id: i32,
    pub connection: ConnectionId,
}

#[derive(Debug, Clone)]
pub struct CommandFailedEvent {
    pub duration: Duration,
    pub command_name: String,
    pub failure: String,
    pub request_id: i32,
    pub connection: ConnectionId,
}

/// Receives command monitoring events. Every method defaults to doing nothing, so an
/// implementation only overrides what it wants to observe.
pub trait CommandEventHandler: Send + Sync {
    fn handle_command_started_event(&self, _event: CommandStartedEvent) {}

    fn handle_command_succeeded_event(&self, _event: CommandSucceededEvent) {}

    fn handle_command_failed_event(&self, _event: CommandFailedEvent) {}
}

/// Logs command events through `tracing` at the `info` level.
#[derive(Debug, Default, Clone)]
pub struct TracingCommandEventHandler {
    command_started_only: bool,
}

impl TracingCommandEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only log started events.
    pub fn started_only() -> Self {
        Self {
            command_started_only: true,
        }
    }
}

impl CommandEventHandler for TracingCommandEventHandler {
    fn handle_command_started_event(&self, event: CommandStartedEvent) {
        let command = Bson::Document(event.command).into_relaxed_extjson();
        tracing::info!(
            connection = %event.connection,
            request_id = event.request_id,
            "Command `{}` started on `{}`: {}",
            event.command_name,
            event.database_name,
            command
        );
    }

    fn handle_command_succeeded_event(&self, event: CommandSucceededEvent) {
        if self.command_started_only {
            return;
        }
        tracing::info!(
            connection = %event.connection,
            request_id = event.request_id,
            "Command `{}` succeeded in {:?}",
            event.command_name,
            event.duration
        );
    }

    fn handle_command_failed_event(&self, event: CommandFailedEvent) {
        if self.command_started_only {
            return;
        }
        tracing::warn!(
            connection = %event.connection,
            request_id = event.request_id,
            "Command `{}` failed in {:?}: {}",
            event.command_name,
            event.duration,
            event.failure
        );
    }
}
