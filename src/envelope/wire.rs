//! JSON-line framing of calls and responses.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::types::RawRequest;
use super::{DecodeError, FrameError, Request};

/// The single remotely callable operation exposed by the engine.
pub const RPC_METHOD: &str = "LoMTransport.Call";

/// A framed call: the operation name plus its request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCall {
    pub method: String,
    pub request: Request,
}

impl WireCall {
    /// Wraps `request` in a call to [`RPC_METHOD`].
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            method: RPC_METHOD.to_string(),
            request,
        }
    }

    /// Decodes a call frame, keeping payload/kind mismatches typed.
    ///
    /// # Errors
    ///
    /// See [`Request::decode`].
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        #[derive(Deserialize)]
        struct RawCall {
            method: String,
            request: RawRequest,
        }

        let raw: RawCall = serde_json::from_str(line)?;
        Ok(Self {
            method: raw.method,
            request: Request::try_from(raw.request)?,
        })
    }
}

/// Writes `value` as one JSON line and flushes.
///
/// # Errors
///
/// Returns an error if `value` cannot be encoded or the write fails.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `None` when the peer closed the stream.
///
/// # Errors
///
/// Returns an error if reading from the stream fails.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_string()))
}
