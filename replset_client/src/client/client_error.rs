use std::time::Duration;

use crate::{
    error_chain_fmt, CommandError, ConnectionStringError, MonitorError, ReadPreferenceError,
    SelectionError, ServerAddress, ServerAddressError, TransportError,
};

#[derive(thiserror::Error)]
pub enum ClientError {
    #[error("No seeds were supplied and a client can't exist without at least one")]
    MissingSeedsError,
    #[error("Invalid seed `{seed}`")]
    InvalidSeed {
        seed: String,
        #[source]
        source: ServerAddressError,
    },
    #[error("No usable topology after waiting {0:?} for the monitor")]
    ServerSelectionTimeout(Duration),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("Command failed on {address}")]
    CommandFailed {
        address: ServerAddress,
        #[source]
        source: CommandFailure,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error(transparent)]
    ConnectionString(#[from] ConnectionStringError),
    #[error(transparent)]
    ReadPreference(#[from] ReadPreferenceError),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Why a command sent to a selected member failed.
#[derive(thiserror::Error)]
pub enum CommandFailure {
    /// The member answered with an error reply.
    #[error(transparent)]
    Reply(#[from] CommandError),
    /// The connection broke while the command was in flight.
    #[error(transparent)]
    Connection(#[from] TransportError),
}

impl std::fmt::Debug for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_debug_prints_the_cause_chain() {
        // Arrange
        let error = ClientError::CommandFailed {
            address: ServerAddress::new("a", 27017),
            source: CommandFailure::Reply(CommandError {
                code: 13,
                code_name: "Unauthorized".into(),
                message: "not authorized".into(),
            }),
        };

        // Act
        let output = format!("{:?}", error);

        // Assert
        assert!(output.starts_with("Command failed on a:27017"), "{}", output);
        assert!(output.contains("Caused by:"), "{}", output);
        assert!(output.contains("(Unauthorized): not authorized"), "{}", output);
    }

    #[test]
    fn invalid_seed_debug_prints_the_address_error() {
        let error = ClientError::InvalidSeed {
            seed: "a:x".into(),
            source: ServerAddressError::InvalidPort("x".into()),
        };

        let output = format!("{:?}", error);

        assert!(output.contains("Caused by:\n\tInvalid port `x`"), "{}", output);
    }
}
