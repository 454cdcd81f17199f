//! RPC listener for the engine.
//!
//! Accepts plugin host connections and feeds every framed call into the
//! [`TransportCore`]. Calls on one connection are served one at a time.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::TransportConfig;
use crate::envelope::{codes, read_frame, write_frame, Response, WireCall, RPC_METHOD};

use super::{ServerError, TransportCore};

/// Listener that exposes the transport core on a loopback address.
#[derive(Debug)]
pub struct RpcServer {
    address: String,
    core: Arc<TransportCore>,
}

impl RpcServer {
    /// Creates a server for `config.server.address` feeding `core`.
    #[must_use]
    pub fn new(config: &TransportConfig, core: Arc<TransportCore>) -> Self {
        Self {
            address: config.server.address.clone(),
            core,
        }
    }

    /// Returns the configured address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Binds the address and spawns the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind.
    pub async fn start(&self) -> Result<ServerHandle, ServerError> {
        let listener =
            TcpListener::bind(&self.address)
                .await
                .map_err(|source| ServerError::Bind {
                    address: self.address.clone(),
                    source,
                })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(address = %local_addr, "RPC server started");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!("RPC server shutting down");
                            break;
                        }
                    }

                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, peer)) => {
                                let core = Arc::clone(&core);
                                let shutdown_rx = shutdown_rx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, core, shutdown_rx).await {
                                        tracing::warn!(peer = %peer, error = %e, "Connection handler error");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to accept connection");
                            }
                        }
                    }
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
        })
    }
}

/// Handle for a running RPC server.
///
/// When dropped, the accept loop and all connection tasks stop.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Returns the bound address (useful when the configured port was 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Serves calls from one plugin host until it disconnects.
async fn handle_connection(
    stream: TcpStream,
    core: Arc<TransportCore>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let line = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => return Ok(()),
            line = read_frame(&mut reader) => line?,
        };

        let Some(line) = line else {
            tracing::debug!("Connection closed by peer");
            return Ok(());
        };

        let dispatch = dispatch_frame(&core, &line);
        tokio::pin!(dispatch);

        // Dropping the dispatch closes the reply slot, so the engine sees the
        // call as abandoned instead of delivering into a dead socket.
        let response = tokio::select! {
            biased;

            response = &mut dispatch => response,
            () = peer_hangup(&mut reader) => {
                tracing::debug!("Peer closed the connection with a call in flight");
                return Ok(());
            }
        };
        write_frame(&mut writer, &response).await?;
    }
}

/// Resolves once the peer closes its side or the read fails. Bytes that
/// arrive early stay buffered for the next frame.
async fn peer_hangup<R: AsyncBufRead + Unpin>(reader: &mut R) {
    match reader.fill_buf().await {
        Ok([]) | Err(_) => {}
        Ok(_) => std::future::pending().await,
    }
}

/// Decodes one call and waits for the engine's answer.
async fn dispatch_frame(core: &TransportCore, line: &str) -> Response {
    let call = match WireCall::decode(line) {
        Ok(call) => call,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting undecodable call");
            return Response::failure(codes::INVALID_REQUEST, e.to_string());
        }
    };

    if call.method != RPC_METHOD {
        tracing::warn!(method = %call.method, "Rejecting call to unknown method");
        return Response::failure(
            codes::INVALID_REQUEST,
            format!("Unknown method: {}", call.method),
        );
    }

    match core.accept(call.request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "Call was not answered");
            Response::failure(codes::SHUTTING_DOWN, e.to_string())
        }
    }
}
