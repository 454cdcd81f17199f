//! Envelope error types.

use super::RequestKind;

/// Errors raised while decoding an incoming frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or misses envelope fields.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload does not have the shape required by its kind.
    #[error("Payload does not match request kind {kind}: {source}")]
    PayloadMismatch {
        kind: RequestKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while writing a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_mismatch_display_names_kind() {
        let source = serde_json::from_str::<u8>("\"x\"").unwrap_err();
        let err = DecodeError::PayloadMismatch {
            kind: RequestKind::RegisterAction,
            source,
        };
        assert!(err
            .to_string()
            .starts_with("Payload does not match request kind register_action"));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: FrameError = io_err.into();
        assert!(matches!(err, FrameError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }
}
