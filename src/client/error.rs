//! Client error types.

use crate::envelope::RequestKind;

/// Errors returned by [`ClientSession`](super::ClientSession) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to dial the engine.
    #[error("Failed to connect to engine: {0}")]
    Connect(std::io::Error),

    /// I/O error on the established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine hung up before answering.
    #[error("Engine closed the connection")]
    ConnectionClosed,

    /// The operation requires a registered client.
    #[error("Client is not registered, cannot {op}")]
    NotRegistered { op: RequestKind },

    /// The session is already registered.
    #[error("Client already registered as {client}")]
    AlreadyRegistered { client: String },

    /// A client or action name was empty.
    #[error("Invalid {what} name: must not be empty")]
    InvalidName { what: &'static str },

    /// The engine answered with a non-zero result code.
    #[error("{op} failed for client '{client}'{}: [{code}] {message}", action_context(.action.as_deref()))]
    Remote {
        op: RequestKind,
        code: i32,
        message: String,
        client: String,
        action: Option<String>,
    },

    /// The response payload does not fit the operation.
    #[error("Unexpected payload for {op}: expected {expected}, found {found}")]
    UnexpectedPayload {
        op: RequestKind,
        expected: &'static str,
        found: &'static str,
    },

    /// Failed to encode a request.
    #[error("Failed to encode request: {0}")]
    Encode(serde_json::Error),

    /// Failed to decode a response.
    #[error("Malformed response: {0}")]
    Decode(serde_json::Error),
}

impl ClientError {
    /// Whether the error came from the connection rather than the protocol.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Io(_) | Self::ConnectionClosed
        )
    }
}

fn action_context(action: Option<&str>) -> String {
    action.map(|a| format!(" action '{a}'")).unwrap_or_default()
}
