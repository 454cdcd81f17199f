//! Server error types.

use crate::envelope::FrameError;

/// Errors raised by the listener and the transport core.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listening address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// The core no longer accepts calls.
    #[error("Inbound call queue is closed")]
    QueueClosed,

    /// The call was discarded without a response.
    #[error("Call {call_id} was dropped without a response")]
    ReplyDropped { call_id: u64 },

    /// I/O error on a connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to write a response frame.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}
