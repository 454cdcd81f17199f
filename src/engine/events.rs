//! Events the engine publishes to its owner.

use chrono::{DateTime, Utc};

use crate::envelope::{ActionResponse, ServerRequestData};

/// Something a client did, as observed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ClientRegistered {
        client: String,
    },
    ClientDeregistered {
        client: String,
    },
    ActionRegistered {
        client: String,
        action: String,
    },
    ActionDeregistered {
        client: String,
        action: String,
    },
    /// A client pushed back the outcome of an action.
    ActionCompleted {
        client: String,
        response: ActionResponse,
    },
    /// A client acknowledged a shutdown command.
    ShutdownAcknowledged {
        client: String,
    },
    Heartbeat {
        client: String,
        action: String,
        timestamp: DateTime<Utc>,
    },
    /// A command was discarded because its client went away.
    CommandDropped {
        client: String,
        command: ServerRequestData,
    },
}

impl EngineEvent {
    /// Client the event concerns.
    #[must_use]
    pub fn client(&self) -> &str {
        match self {
            Self::ClientRegistered { client }
            | Self::ClientDeregistered { client }
            | Self::ActionRegistered { client, .. }
            | Self::ActionDeregistered { client, .. }
            | Self::ActionCompleted { client, .. }
            | Self::ShutdownAcknowledged { client }
            | Self::Heartbeat { client, .. }
            | Self::CommandDropped { client, .. } => client,
        }
    }
}
