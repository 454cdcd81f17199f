//! Engine error types.

use crate::envelope::{codes, Response};

/// Reasons the engine refuses a call or a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// RegisterClient carried an empty name.
    #[error("Client name must not be empty")]
    EmptyClientName,

    /// The calling client is unknown to the engine.
    #[error("Client {0} is not registered")]
    ClientNotRegistered(String),

    /// An action operation named no action.
    #[error("Action name must not be empty")]
    EmptyActionName,

    /// The action table does not allow this action.
    #[error("Action {0} is not configured or disabled")]
    ActionNotConfigured(String),

    /// Another client owns the action.
    #[error("Action {action} is already registered by {owner}")]
    ActionOwned { action: String, owner: String },

    /// The caller does not own the action.
    #[error("Action {action} is not registered by client {client}")]
    ActionNotRegistered { client: String, action: String },

    /// A command for the action was delivered and not yet answered.
    #[error("Action {0} has a command awaiting its response")]
    ActionInFlight(String),

    /// A response arrived with no command outstanding.
    #[error("Client {0} has no request awaiting a response")]
    NoPendingRequest(String),

    /// The response does not answer the outstanding command.
    #[error("Response does not match the outstanding {expected} request")]
    ResponseMismatch { expected: &'static str },

    /// The engine has stopped or is stopping.
    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Result code reported to the client.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::EmptyClientName
            | Self::EmptyActionName
            | Self::ActionNotConfigured(_)
            | Self::ResponseMismatch { .. } => codes::INVALID_REQUEST,
            Self::ClientNotRegistered(_) | Self::ActionNotRegistered { .. } => {
                codes::NOT_REGISTERED
            }
            Self::ActionOwned { .. } | Self::ActionInFlight(_) => codes::CONFLICT,
            Self::NoPendingRequest(_) => codes::NO_PENDING_REQUEST,
            Self::ShuttingDown => codes::SHUTTING_DOWN,
        }
    }

    /// Failed response carrying this error.
    #[must_use]
    pub fn to_response(&self) -> Response {
        Response::failure(self.code(), self.to_string())
    }
}
